//! Row-level access control: principals and compiled document predicates

use serde::{Deserialize, Serialize};

/// The resolved acting identity used for authorization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Principal {
    /// Opaque principal id (empty when unauthenticated)
    #[serde(default)]
    pub id: String,

    /// Principal email (empty when unknown)
    #[serde(default)]
    pub email: String,

    /// Group ids the principal belongs to
    #[serde(default)]
    pub groups: Vec<String>,

    /// Admins bypass all document filters
    #[serde(default)]
    pub is_admin: bool,
}

impl Principal {
    pub fn admin() -> Self {
        Self {
            is_admin: true,
            ..Default::default()
        }
    }

    pub fn user(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            groups: Vec::new(),
            is_admin: false,
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// A principal with no identity at all; matches only public documents.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// One way a principal can gain access to a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessClause {
    OwnerId(String),
    OwnerEmail(String),
    Public,
    SharedWith(String),
    GroupIn(Vec<String>),
}

/// Compiled document-level filter, expressed as data so each store backend
/// can translate it into its native query form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPredicate {
    /// No filtering (admin)
    All,

    /// Document matches when any clause holds
    AnyOf(Vec<AccessClause>),
}

impl AccessPredicate {
    /// Compile a principal into the predicate every searcher must apply.
    pub fn compile(principal: &Principal) -> Self {
        if principal.is_admin {
            return AccessPredicate::All;
        }

        let mut clauses = Vec::with_capacity(5);
        if !principal.id.is_empty() {
            clauses.push(AccessClause::OwnerId(principal.id.clone()));
            clauses.push(AccessClause::SharedWith(principal.id.clone()));
        }
        if !principal.email.is_empty() {
            clauses.push(AccessClause::OwnerEmail(principal.email.clone()));
        }
        clauses.push(AccessClause::Public);
        if !principal.groups.is_empty() {
            clauses.push(AccessClause::GroupIn(principal.groups.clone()));
        }

        AccessPredicate::AnyOf(clauses)
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, AccessPredicate::All)
    }

    /// Evaluate the predicate against a document's ownership fields.
    ///
    /// Store backends translate the predicate into their query language; this
    /// in-process form backs the in-memory store and the write-access check.
    pub fn matches(&self, access: &DocumentAccess) -> bool {
        match self {
            AccessPredicate::All => true,
            AccessPredicate::AnyOf(clauses) => clauses.iter().any(|clause| match clause {
                AccessClause::OwnerId(id) => !id.is_empty() && access.owner_id == *id,
                AccessClause::OwnerEmail(email) => {
                    !email.is_empty() && access.owner_email == *email
                }
                AccessClause::Public => access.is_public,
                AccessClause::SharedWith(id) => {
                    !id.is_empty() && access.shared_with.iter().any(|s| s == id)
                }
                AccessClause::GroupIn(groups) => access
                    .group_ids
                    .iter()
                    .any(|g| groups.iter().any(|pg| pg == g)),
            }),
        }
    }
}

/// The ownership fields of a document that access decisions read
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentAccess {
    pub owner_id: String,
    pub owner_email: String,
    pub is_public: bool,
    pub shared_with: Vec<String>,
    pub group_ids: Vec<String>,
}

/// Write access is narrower than read access: only the owner (by id or
/// email) or an admin may delete or modify a document.
pub fn can_write(principal: &Principal, access: &DocumentAccess) -> bool {
    if principal.is_admin {
        return true;
    }
    (!principal.id.is_empty() && access.owner_id == principal.id)
        || (!principal.email.is_empty() && access.owner_email == principal.email)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_doc(owner: &str) -> DocumentAccess {
        DocumentAccess {
            owner_id: owner.to_string(),
            owner_email: format!("{}@example.com", owner),
            is_public: false,
            shared_with: vec![],
            group_ids: vec![],
        }
    }

    #[test]
    fn test_admin_matches_everything() {
        let predicate = AccessPredicate::compile(&Principal::admin());
        assert!(predicate.is_unrestricted());
        assert!(predicate.matches(&private_doc("someone-else")));
    }

    #[test]
    fn test_owner_matches_own_document() {
        let principal = Principal::user("user-123", "u@example.com");
        let predicate = AccessPredicate::compile(&principal);

        let mut doc = private_doc("user-123");
        assert!(predicate.matches(&doc));

        doc.owner_id = "user-456".to_string();
        assert!(!predicate.matches(&doc));
    }

    #[test]
    fn test_email_ownership() {
        let principal = Principal::user("", "owner@example.com");
        let predicate = AccessPredicate::compile(&principal);

        let doc = DocumentAccess {
            owner_id: "other-id".to_string(),
            owner_email: "owner@example.com".to_string(),
            ..Default::default()
        };
        assert!(predicate.matches(&doc));
    }

    #[test]
    fn test_shared_and_group_access() {
        let principal =
            Principal::user("user-123", "u@example.com").with_groups(vec!["eng".to_string()]);
        let predicate = AccessPredicate::compile(&principal);

        let shared = DocumentAccess {
            owner_id: "other".to_string(),
            shared_with: vec!["user-123".to_string()],
            ..Default::default()
        };
        assert!(predicate.matches(&shared));

        let grouped = DocumentAccess {
            owner_id: "other".to_string(),
            group_ids: vec!["eng".to_string(), "sales".to_string()],
            ..Default::default()
        };
        assert!(predicate.matches(&grouped));

        let unrelated = DocumentAccess {
            owner_id: "other".to_string(),
            group_ids: vec!["sales".to_string()],
            ..Default::default()
        };
        assert!(!predicate.matches(&unrelated));
    }

    #[test]
    fn test_anonymous_matches_public_only() {
        let predicate = AccessPredicate::compile(&Principal::anonymous());

        let mut doc = private_doc("owner");
        assert!(!predicate.matches(&doc));

        doc.is_public = true;
        assert!(predicate.matches(&doc));
    }

    #[test]
    fn test_empty_owner_fields_never_match_empty_claims() {
        // A document with empty ownership fields must not leak to a
        // principal whose id/email are also empty.
        let predicate = AccessPredicate::compile(&Principal::anonymous());
        let doc = DocumentAccess::default();
        assert!(!predicate.matches(&doc));
    }

    #[test]
    fn test_write_access() {
        let owner = Principal::user("user-123", "u@example.com");
        let reader =
            Principal::user("user-456", "r@example.com").with_groups(vec!["eng".to_string()]);

        let doc = DocumentAccess {
            owner_id: "user-123".to_string(),
            owner_email: "u@example.com".to_string(),
            is_public: true,
            group_ids: vec!["eng".to_string()],
            ..Default::default()
        };

        assert!(can_write(&owner, &doc));
        // Public/group visibility does not grant write access
        assert!(!can_write(&reader, &doc));
        assert!(can_write(&Principal::admin(), &doc));
    }
}
