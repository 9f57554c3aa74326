use std::collections::BTreeMap;

/// Decides who may record which action.
///
/// Consulted by [`Ledger::append`](crate::Ledger::append) before anything
/// is sealed or written, so a denied append leaves no trace in the store.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, author_identity: &str, action_type: &str) -> bool;
}

/// Accepts every author for every action.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _author_identity: &str, _action_type: &str) -> bool {
        true
    }
}

/// Fixed allow-list of author to action-type prefixes.
///
/// The author `"*"` grants its prefixes to everyone.
///
/// ```
/// use cal_ledger::{Authorizer, StaticAuthorizer};
///
/// let auth = StaticAuthorizer::new()
///     .allow("clerk:7", "document_")
///     .allow("*", "petition_signed");
/// assert!(auth.authorize("clerk:7", "document_uploaded"));
/// assert!(auth.authorize("member:3", "petition_signed"));
/// assert!(!auth.authorize("member:3", "document_uploaded"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticAuthorizer {
    grants: BTreeMap<String, Vec<String>>,
}

impl StaticAuthorizer {
    pub const ANY_AUTHOR: &'static str = "*";

    pub fn new() -> Self {
        Self::default()
    }

    /// Let `author_identity` record any action whose type starts with
    /// `action_prefix`. An empty prefix allows every action.
    pub fn allow(
        mut self,
        author_identity: impl Into<String>,
        action_prefix: impl Into<String>,
    ) -> Self {
        self.grants
            .entry(author_identity.into())
            .or_default()
            .push(action_prefix.into());
        self
    }

    pub fn prefixes(&self, author_identity: &str) -> &[String] {
        self.grants
            .get(author_identity)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Authorizer for StaticAuthorizer {
    fn authorize(&self, author_identity: &str, action_type: &str) -> bool {
        [author_identity, Self::ANY_AUTHOR]
            .into_iter()
            .flat_map(|author| self.prefixes(author))
            .any(|prefix| action_type.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_accepts_anything() {
        assert!(AllowAll.authorize("anyone", "vote_cast"));
    }

    #[test]
    fn unknown_author_is_denied() {
        let auth = StaticAuthorizer::new().allow("clerk:1", "document_");
        assert!(!auth.authorize("clerk:2", "document_uploaded"));
        assert!(auth.prefixes("clerk:2").is_empty());
    }

    #[test]
    fn prefixes_are_matched_per_author() {
        let auth = StaticAuthorizer::new()
            .allow("clerk:1", "document_")
            .allow("clerk:1", "survey_");
        assert!(auth.authorize("clerk:1", "document_uploaded"));
        assert!(auth.authorize("clerk:1", "survey_submitted"));
        assert!(!auth.authorize("clerk:1", "vote_cast"));
        assert_eq!(auth.prefixes("clerk:1").len(), 2);
    }

    #[test]
    fn wildcard_author_and_empty_prefix() {
        let auth = StaticAuthorizer::new()
            .allow(StaticAuthorizer::ANY_AUTHOR, "message_sent")
            .allow("admin:1", "");
        assert!(auth.authorize("member:9", "message_sent"));
        assert!(!auth.authorize("member:9", "vote_cast"));
        assert!(auth.authorize("admin:1", "vote_cast"));
    }
}
