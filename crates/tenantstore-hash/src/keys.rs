//! Key layout of the hash-record store.
//!
//! ```text
//! [{deployment}:]tenant:{<tenant_id>}:tenant                    tenant record
//! [{deployment}:]tenant:{<tenant_id>}:destinations              destination ID → summary
//! [{deployment}:]tenant:{<tenant_id>}:destination:<dest_id>     destination record
//! [{deployment}]tenant_idx                                      tenant listing index
//! ```
//!
//! The tenant ID is wrapped in braces so that every key of one tenant hashes
//! to the same slot on a clustered backend, which keeps the multi-key
//! batches of a tenant on one node.

/// Builds the keys of one deployment namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Key space for `deployment_id`; `None` or empty means no prefix.
    #[must_use]
    pub fn new(deployment_id: Option<&str>) -> Self {
        let prefix = match deployment_id {
            Some(id) if !id.is_empty() => format!("{id}:"),
            _ => String::new(),
        };
        Self { prefix }
    }

    /// The tenant record.
    #[must_use]
    pub fn tenant(&self, tenant_id: &str) -> String {
        format!("{}tenant:{{{tenant_id}}}:tenant", self.prefix)
    }

    /// The tenant's destination summary hash.
    #[must_use]
    pub fn destination_summaries(&self, tenant_id: &str) -> String {
        format!("{}tenant:{{{tenant_id}}}:destinations", self.prefix)
    }

    /// A destination record.
    #[must_use]
    pub fn destination(&self, tenant_id: &str, destination_id: &str) -> String {
        format!("{}tenant:{{{tenant_id}}}:destination:{destination_id}", self.prefix)
    }

    /// Name of the tenant listing index.
    #[must_use]
    pub fn tenant_index(&self) -> String {
        format!("{}tenant_idx", self.prefix)
    }

    /// Prefix shared by every tenant-owned key of this namespace.
    #[must_use]
    pub fn tenant_prefix(&self) -> String {
        format!("{}tenant:", self.prefix)
    }
}
