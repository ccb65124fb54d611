//! Path-based security constraints
//!
//! Path specs follow the servlet conventions: `/exact`, `/prefix/*`, and `/`
//! as the default. Exact specs beat prefix specs; among prefixes the longest
//! wins.

use crate::login_service::RoleRequirement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintMapping {
    pub path_spec: String,
    pub requirement: RoleRequirement,
}

impl ConstraintMapping {
    /// Whether a request must be authenticated before it reaches the resource
    #[must_use]
    pub fn requires_authentication(&self) -> bool {
        self.requirement != RoleRequirement::None
    }

    /// Match priority for `path`; `None` if the spec does not apply
    fn match_rank(&self, path: &str) -> Option<(u8, usize)> {
        let spec = self.path_spec.as_str();
        if spec == "/" {
            return Some((0, 0));
        }
        if let Some(prefix) = spec.strip_suffix("/*") {
            let matches = path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'));
            return matches.then_some((1, prefix.len()));
        }
        (path == spec).then_some((2, spec.len()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    mappings: Vec<ConstraintMapping>,
}

impl ConstraintSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Protect `path_spec` with the given roles (`**` for any authenticated user)
    pub fn add<I, S>(&mut self, path_spec: impl Into<String>, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mappings.push(ConstraintMapping {
            path_spec: path_spec.into(),
            requirement: RoleRequirement::from_roles(roles),
        });
    }

    /// Most specific mapping for a request path, if any
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&ConstraintMapping> {
        self.mappings
            .iter()
            .filter_map(|mapping| mapping.match_rank(path).map(|rank| (rank, mapping)))
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, mapping)| mapping)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
