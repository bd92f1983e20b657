//! Permission catalog entries and the codes derived from them.
//!
//! A permission code is `<app_label>.<codename>`, e.g. `auth.add_user`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    pub app_label: String,
    pub codename: String,
    /// Human readable label, e.g. "Can add user".
    pub name: String,
}

impl Permission {
    pub fn new(
        app_label: impl Into<String>,
        codename: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            app_label: app_label.into(),
            codename: codename.into(),
            name: name.into(),
        }
    }

    pub fn code(&self) -> String {
        format!("{}.{}", self.app_label, self.codename)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.code(), self.name)
    }
}

/// Split a permission code into `(app_label, codename)`.
pub fn split_code(code: &str) -> Option<(&str, &str)> {
    match code.split_once('.') {
        Some((app, codename)) if !app.is_empty() && !codename.is_empty() => Some((app, codename)),
        _ => None,
    }
}

/// The catalog every fresh backend starts with: add/change/delete/view on users.
pub fn default_catalog() -> Vec<Permission> {
    ["add", "change", "delete", "view"]
        .iter()
        .map(|action| {
            Permission::new(
                "auth",
                format!("{}_user", action),
                format!("Can {} user", action),
            )
        })
        .collect()
}

/// The resolved permission codes a token holds at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedPermissions {
    codes: BTreeSet<String>,
}

impl GrantedPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// True when every code is granted. An empty list is always satisfied.
    pub fn has_all_permissions<I, S>(&self, codes: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        codes.into_iter().all(|c| self.has_permission(c.as_ref()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for GrantedPermissions {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            codes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_code() {
        let p = Permission::new("auth", "add_user", "Can add user");
        assert_eq!(p.code(), "auth.add_user");
        assert_eq!(p.to_string(), "auth.add_user | Can add user");
    }

    #[test]
    fn test_split_code() {
        assert_eq!(split_code("auth.add_user"), Some(("auth", "add_user")));
        assert_eq!(split_code("auth.perm.with.dots"), Some(("auth", "perm.with.dots")));
        assert_eq!(split_code("add_user"), None);
        assert_eq!(split_code(".add_user"), None);
        assert_eq!(split_code("auth."), None);
    }

    #[test]
    fn test_default_catalog() {
        let codes: Vec<String> = default_catalog().iter().map(Permission::code).collect();
        assert_eq!(
            codes,
            vec!["auth.add_user", "auth.change_user", "auth.delete_user", "auth.view_user"]
        );
    }

    #[test]
    fn test_has_all_permissions_empty_is_vacuous() {
        let none = GrantedPermissions::new();
        assert!(none.has_all_permissions(Vec::<String>::new()));

        let some: GrantedPermissions = ["auth.change_user"].into_iter().collect();
        assert!(some.has_all_permissions(Vec::<&str>::new()));
    }

    #[test]
    fn test_has_all_permissions_requires_every_code() {
        let perms: GrantedPermissions = ["auth.add_user", "auth.change_user"].into_iter().collect();
        assert!(perms.has_permission("auth.add_user"));
        assert!(perms.has_all_permissions(["auth.add_user", "auth.change_user"]));
        assert!(!perms.has_all_permissions(["auth.add_user", "auth.delete_user"]));
        assert!(!perms.has_permission("auth.delete_user"));
    }

    #[test]
    fn test_codes_are_deduplicated() {
        let perms: GrantedPermissions = ["auth.add_user", "auth.add_user"].into_iter().collect();
        assert_eq!(perms.len(), 1);
    }
}
