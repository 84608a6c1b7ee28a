//! Expands a scanner request over its dependencies and orders it

use std::collections::BTreeSet;

use crate::error::{Result, ScanError};

use super::{ScannerDescriptor, ScannerKind, ScannerRegistry};

/// Request keyword selecting every scanner enabled by default
pub const ALL_DEFAULT: &str = "all";

/// Ordered set of scanners active for an address
#[derive(Debug, Clone, Default)]
pub struct ScanSet {
    scanners: Vec<ScannerDescriptor>,
}

impl ScanSet {
    pub fn iter(&self) -> impl Iterator<Item = &ScannerDescriptor> {
        self.scanners.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.scanners.iter().map(|d| d.name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ScannerDescriptor> {
        self.scanners.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Same set without `name`, order kept
    pub fn without(&self, name: &str) -> ScanSet {
        ScanSet {
            scanners: self.scanners.iter().filter(|d| d.name != name).copied().collect(),
        }
    }

    /// Same set without any scanner of `kind`
    pub fn without_kind(&self, kind: ScannerKind) -> ScanSet {
        ScanSet {
            scanners: self.scanners.iter().filter(|d| d.kind != kind).copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

/// Resolve `requested` into the effective, ordered scanner set
///
/// The request is closed over `depends` until nothing new is added, then
/// sorted by `order` with ties kept in declaration order. `all` stands for
/// every scanner enabled by default.
pub fn resolve<S: AsRef<str>>(requested: &[S], registry: &ScannerRegistry) -> Result<ScanSet> {
    let mut selected: BTreeSet<&'static str> = BTreeSet::new();
    let mut pending: Vec<&'static str> = Vec::new();

    for name in requested {
        let name = name.as_ref();
        if name == ALL_DEFAULT {
            pending.extend(
                registry
                    .descriptors()
                    .filter(|d| d.enabled_by_default)
                    .map(|d| d.name),
            );
        } else {
            let registration = registry
                .get(name)
                .ok_or_else(|| ScanError::UnknownScanner(name.to_string()))?;
            pending.push(registration.descriptor.name);
        }
    }

    while let Some(name) = pending.pop() {
        if !selected.insert(name) {
            continue;
        }
        let descriptor = registry
            .get(name)
            .ok_or_else(|| ScanError::UnknownScanner(name.to_string()))?
            .descriptor;
        for dep in descriptor.depends {
            let dep = registry
                .get(dep)
                .ok_or_else(|| ScanError::UnknownScanner(format!("{} (required by {})", dep, name)))?;
            if !selected.contains(dep.descriptor.name) {
                pending.push(dep.descriptor.name);
            }
        }
    }

    let mut scanners: Vec<(usize, ScannerDescriptor)> = selected
        .into_iter()
        .filter_map(|name| Some((registry.position(name)?, registry.get(name)?.descriptor)))
        .collect();
    scanners.sort_by_key(|(position, d)| (d.order, *position));
    let set = ScanSet {
        scanners: scanners.into_iter().map(|(_, d)| d).collect(),
    };

    for warning in fact_order_warnings(&set) {
        tracing::warn!("{}", warning);
    }
    Ok(set)
}

/// Consumers ordered at or before a provider of the fact they read
pub fn fact_order_warnings(set: &ScanSet) -> Vec<String> {
    let mut warnings = Vec::new();
    for (i, consumer) in set.scanners.iter().enumerate() {
        for fact in consumer.consumes {
            let late_provider = set.scanners[i..]
                .iter()
                .find(|p| p.name != consumer.name && p.provides.contains(fact));
            if let Some(provider) = late_provider {
                warnings.push(format!(
                    "{} reads {} but runs before {} which records it",
                    consumer.name, fact, provider.name
                ));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::builtin;
    use crate::scanner::FactKey;

    fn descriptor(name: &'static str, order: i32, depends: &'static [&'static str]) -> ScannerDescriptor {
        ScannerDescriptor {
            name,
            description: "test scanner",
            kind: ScannerKind::Analyzer,
            order,
            enabled_by_default: false,
            depends,
            provides: &[],
            consumes: &[],
        }
    }

    fn registry(descriptors: Vec<ScannerDescriptor>) -> ScannerRegistry {
        let mut registry = ScannerRegistry::new();
        for d in descriptors {
            registry.register(d, builtin::hashing::md5_factory).unwrap();
        }
        registry
    }

    #[test]
    fn dependencies_are_pulled_in_and_ordered_first() {
        let registry = registry(vec![
            descriptor("A", 5, &[]),
            descriptor("B", 5, &["A"]),
            descriptor("C", 1, &["B"]),
        ]);
        let set = resolve(&["C"], &registry).unwrap();
        // same order for A and B: declaration order decides
        assert_eq!(set.names(), vec!["C", "A", "B"]);

        let set = resolve(&["B"], &registry).unwrap();
        assert_eq!(set.names(), vec!["A", "B"]);
    }

    #[test]
    fn all_selects_default_scanners() {
        let set = resolve(&["all"], &ScannerRegistry::builtin()).unwrap();
        assert_eq!(
            set.names(),
            vec![
                "TypeDetect",
                "Md5Sum",
                "GzipExpand",
                "ArchiveExpand",
                "TarExpand",
                "MailExpand"
            ]
        );
    }

    #[test]
    fn expander_request_brings_type_detection() {
        let set = resolve(&["ArchiveExpand"], &ScannerRegistry::builtin()).unwrap();
        assert_eq!(set.names(), vec!["TypeDetect", "ArchiveExpand"]);
    }

    #[test]
    fn unknown_names_fail() {
        let err = resolve(&["Nope"], &ScannerRegistry::builtin()).unwrap_err();
        assert!(matches!(err, ScanError::UnknownScanner(ref n) if n == "Nope"));

        let registry = registry(vec![descriptor("B", 0, &["Missing"])]);
        let err = resolve(&["B"], &registry).unwrap_err();
        assert!(matches!(err, ScanError::UnknownScanner(_)));
    }

    #[test]
    fn without_removes_by_name_and_kind() {
        let set = resolve(&["all", "CarveScan"], &ScannerRegistry::builtin()).unwrap();
        assert!(set.contains("CarveScan"));
        let child = set.without("ArchiveExpand").without_kind(ScannerKind::Carver);
        assert_eq!(
            child.names(),
            vec!["TypeDetect", "Md5Sum", "GzipExpand", "TarExpand", "MailExpand"]
        );
        assert_eq!(set.len(), 7);
    }

    #[test]
    fn misordered_fact_consumer_is_reported() {
        let mut reader = descriptor("Reader", 0, &[]);
        reader.consumes = &[FactKey::ContentType];
        let mut writer = descriptor("Writer", 10, &[]);
        writer.provides = &[FactKey::ContentType];
        let registry = registry(vec![reader, writer]);

        let set = resolve(&["Reader", "Writer"], &registry).unwrap();
        let warnings = fact_order_warnings(&set);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Reader reads content-type"));

        let builtin = resolve(&["all", "CarveScan", "Sha256Sum"], &ScannerRegistry::builtin()).unwrap();
        assert!(fact_order_warnings(&builtin).is_empty());
    }
}
