//! Permission gate: maps (method, resource type) to required permission codes
//! and decides whether a request's token holds all of them.
//!
//! Default method table:
//! - `GET`, `OPTIONS`, `HEAD`: nothing required
//! - `POST`: `{app_label}.add_{model_name}`
//! - `PUT`, `PATCH`: `{app_label}.change_{model_name}`
//! - `DELETE`: `{app_label}.delete_{model_name}`
//!
//! Replace the table (e.g. to require `view` on reads) with a YAML file. The
//! file is the whole table, so every method a route serves must appear:
//!
//! ```yaml
//! GET: ["{app_label}.view_{model_name}"]
//! HEAD: ["{app_label}.view_{model_name}"]
//! OPTIONS: []
//! POST: ["{app_label}.add_{model_name}"]
//! PUT: ["{app_label}.change_{model_name}"]
//! PATCH: ["{app_label}.change_{model_name}"]
//! DELETE: ["{app_label}.delete_{model_name}"]
//! ```
//!
//! A method missing from the table is a configuration error, not a denial.

use std::collections::{BTreeSet, HashMap};

use axum::http::Method;
use once_cell::sync::Lazy;
use regex::Regex;

use super::context::SecurityContext;
use crate::errors::{AppError, ConfigurationError};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder regex is valid"));

const APP_LABEL: &str = "app_label";
const MODEL_NAME: &str = "model_name";

// ── Resource descriptors ────────────────────────────────────

/// What a protected endpoint operates on, e.g. `("auth", "user")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub app_label: String,
    pub model_name: String,
}

impl ResourceDescriptor {
    pub fn new(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model_name: model_name.into(),
        }
    }
}

/// Permission settings attached to a route when it is registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub resource: Option<ResourceDescriptor>,
    /// Meta endpoints with no single resource type (e.g. the API root).
    pub ignore_permissions: bool,
}

impl Endpoint {
    pub fn resource(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            resource: Some(ResourceDescriptor::new(app_label, model_name)),
            ignore_permissions: false,
        }
    }

    pub fn ignoring_permissions() -> Self {
        Self {
            resource: None,
            ignore_permissions: true,
        }
    }
}

// ── Templates ───────────────────────────────────────────────

/// A permission code with `{app_label}` / `{model_name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTemplate(String);

impl PermissionTemplate {
    pub fn parse(template: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidTemplate {
            template: template.to_string(),
            reason,
        };

        if template.trim().is_empty() {
            return Err(invalid("template is empty".into()));
        }

        for cap in PLACEHOLDER.captures_iter(template) {
            let name = &cap[1];
            if name != APP_LABEL && name != MODEL_NAME {
                return Err(invalid(format!("unknown placeholder '{{{}}}'", name)));
            }
        }

        let stripped = PLACEHOLDER.replace_all(template, "");
        if stripped.contains('{') || stripped.contains('}') {
            return Err(invalid("unbalanced braces".into()));
        }

        Ok(Self(template.to_string()))
    }

    /// Substitute placeholders in one pass; values are never re-expanded.
    pub fn render(&self, resource: &ResourceDescriptor) -> String {
        PLACEHOLDER
            .replace_all(&self.0, |cap: &regex::Captures<'_>| match &cap[1] {
                APP_LABEL => resource.app_label.clone(),
                MODEL_NAME => resource.model_name.clone(),
                other => format!("{{{}}}", other),
            })
            .into_owned()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ── Method table ────────────────────────────────────────────

/// Immutable method → templates table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermsMap {
    map: HashMap<String, Vec<PermissionTemplate>>,
}

impl PermsMap {
    /// Build from `(method, templates)` pairs. Method names are case-insensitive.
    pub fn from_table<M, T, I>(table: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (M, Vec<T>)>,
        M: AsRef<str>,
        T: AsRef<str>,
    {
        let mut map = HashMap::new();
        for (method, templates) in table {
            let parsed = templates
                .iter()
                .map(|t| PermissionTemplate::parse(t.as_ref()))
                .collect::<Result<Vec<_>, _>>()?;
            let method = method.as_ref().trim().to_uppercase();
            if map.insert(method.clone(), parsed).is_some() {
                return Err(ConfigurationError::DuplicateMethod(method));
            }
        }
        Ok(Self { map })
    }

    /// Parse a YAML mapping of method name to a list of templates.
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let table: HashMap<String, Vec<String>> = serde_yaml::from_str(raw)?;
        Ok(Self::from_table(table)?)
    }

    /// Copy of this table with one method's templates replaced.
    pub fn with_method<T: AsRef<str>>(
        &self,
        method: &str,
        templates: &[T],
    ) -> Result<Self, ConfigurationError> {
        let mut map = self.map.clone();
        let parsed = templates
            .iter()
            .map(|t| PermissionTemplate::parse(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        map.insert(method.trim().to_uppercase(), parsed);
        Ok(Self { map })
    }

    pub fn templates_for(&self, method: &Method) -> Result<&[PermissionTemplate], ConfigurationError> {
        self.map
            .get(method.as_str())
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigurationError::UnmappedMethod(method.to_string()))
    }
}

impl Default for PermsMap {
    fn default() -> Self {
        let add = vec!["{app_label}.add_{model_name}"];
        let change = vec!["{app_label}.change_{model_name}"];
        let delete = vec!["{app_label}.delete_{model_name}"];
        let none: Vec<&str> = vec![];

        Self::from_table([
            ("GET", none.clone()),
            ("OPTIONS", none.clone()),
            ("HEAD", none),
            ("POST", add),
            ("PUT", change.clone()),
            ("PATCH", change),
            ("DELETE", delete),
        ])
        .expect("default permission templates are valid")
    }
}

// ── Gate ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Stateless authorization decision over an injected `PermsMap`.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    perms_map: PermsMap,
    authenticated_users_only: bool,
}

impl PermissionGate {
    pub fn new(perms_map: PermsMap, authenticated_users_only: bool) -> Self {
        Self {
            perms_map,
            authenticated_users_only,
        }
    }

    pub fn perms_map(&self) -> &PermsMap {
        &self.perms_map
    }

    /// The codes a token must hold to call `method` on `resource`.
    pub fn required_permissions(
        &self,
        method: &Method,
        resource: &ResourceDescriptor,
    ) -> Result<BTreeSet<String>, ConfigurationError> {
        Ok(self
            .perms_map
            .templates_for(method)?
            .iter()
            .map(|t| t.render(resource))
            .collect())
    }

    /// Registration-time check: the endpoint is evaluable for every method it serves.
    pub fn check_endpoint(
        &self,
        endpoint: &Endpoint,
        methods: &[Method],
    ) -> Result<(), ConfigurationError> {
        if endpoint.ignore_permissions {
            return Ok(());
        }
        if endpoint.resource.is_none() {
            return Err(ConfigurationError::MissingResourceDescriptor);
        }
        for method in methods {
            self.perms_map.templates_for(method)?;
        }
        Ok(())
    }

    pub async fn authorize(
        &self,
        ctx: Option<&SecurityContext>,
        method: &Method,
        endpoint: &Endpoint,
    ) -> Result<Decision, AppError> {
        if endpoint.ignore_permissions {
            return Ok(Decision::Allow);
        }

        let resource = endpoint
            .resource
            .as_ref()
            .ok_or(ConfigurationError::MissingResourceDescriptor)?;

        if ctx.is_none() && self.authenticated_users_only {
            tracing::debug!(%method, "permission gate: anonymous request denied");
            return Ok(Decision::Deny);
        }

        let required = self.required_permissions(method, resource)?;
        if required.is_empty() {
            return Ok(Decision::Allow);
        }

        // Anonymous callers hold no grants.
        let Some(ctx) = ctx else {
            return Ok(Decision::Deny);
        };

        if ctx.has_all_permissions(&required).await? {
            tracing::debug!(
                token = %ctx.token().masked_key(),
                %method,
                resource = %format!("{}.{}", resource.app_label, resource.model_name),
                "permission gate: allowed"
            );
            Ok(Decision::Allow)
        } else {
            tracing::warn!(
                token = %ctx.token().masked_key(),
                user = %ctx.principal().username,
                %method,
                required = ?required,
                "permission gate: access denied"
            );
            Ok(Decision::Deny)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
