// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Principals, roles, and scope projection.
//!
//! A principal is the authenticated subject plus the role and MCP
//! permissions projected from its OAuth scopes. Projection is a pure
//! function of the granted scopes so the same table applies to
//! introspected and locally-verified tokens.

use serde::{Deserialize, Serialize};

/// Business role of an authenticated subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Executive,
    Manager,
    Clerk,
    Service,
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executive => "executive",
            Self::Manager => "manager",
            Self::Clerk => "clerk",
            Self::Service => "service",
            Self::Unknown => "unknown",
        }
    }
}

/// MCP-surface permissions granted to a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "mcp:read")]
    McpRead,
    #[serde(rename = "mcp:execute")]
    McpExecute,
    #[serde(rename = "mcp:admin")]
    McpAdmin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::McpRead => "mcp:read",
            Self::McpExecute => "mcp:execute",
            Self::McpAdmin => "mcp:admin",
        }
    }
}

/// A parsed OAuth scope granted to a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    ReadAll,
    WriteAll,
    /// Data access limited to models whose canonical name equals the domain.
    ReadDomain(String),
    None,
    /// Scopes this gateway does not interpret (kept for introspection echo).
    Other(String),
}

impl Scope {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "read:all" => Self::ReadAll,
            "write:all" => Self::WriteAll,
            "none" => Self::None,
            other => match other.strip_prefix("read:") {
                Some(domain) if !domain.is_empty() => Self::ReadDomain(domain.to_string()),
                _ => Self::Other(other.to_string()),
            },
        }
    }
}

/// The authenticated identity with its projected rights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Principal {
    pub subject: String,
    pub role: Role,
    /// Raw scope strings as granted (echoed by introspection).
    pub scopes: Vec<String>,
    pub permissions: Vec<Permission>,
    pub has_data_access: bool,
}

impl Principal {
    /// Project granted scopes into a principal.
    ///
    /// Projection table:
    /// - `read:all` permits `mcp:read` + `mcp:execute`, full data access (executive)
    /// - `write:all` additionally permits `mcp:admin` (manager)
    /// - `read:<domain>` permits read/execute on that domain only (manager)
    /// - `none` carries no data access (clerk)
    pub fn project(subject: impl Into<String>, scopes: &[String]) -> Self {
        let parsed: Vec<Scope> = scopes.iter().map(|s| Scope::parse(s)).collect();

        let mut permissions = Vec::new();
        let mut has_data_access = false;
        let mut role = Role::Unknown;

        for scope in &parsed {
            match scope {
                Scope::ReadAll => {
                    push_unique(&mut permissions, Permission::McpRead);
                    push_unique(&mut permissions, Permission::McpExecute);
                    has_data_access = true;
                    role = Role::Executive;
                }
                Scope::WriteAll => {
                    push_unique(&mut permissions, Permission::McpRead);
                    push_unique(&mut permissions, Permission::McpExecute);
                    push_unique(&mut permissions, Permission::McpAdmin);
                    has_data_access = true;
                    if role != Role::Executive {
                        role = Role::Manager;
                    }
                }
                Scope::ReadDomain(_) => {
                    push_unique(&mut permissions, Permission::McpRead);
                    push_unique(&mut permissions, Permission::McpExecute);
                    has_data_access = true;
                    if role == Role::Unknown || role == Role::Clerk {
                        role = Role::Manager;
                    }
                }
                Scope::None => {
                    if role == Role::Unknown {
                        role = Role::Clerk;
                    }
                }
                Scope::Other(_) => {}
            }
        }

        // A clerk without any read scope must not see data.
        if role == Role::Clerk {
            has_data_access = false;
        }

        Self {
            subject: subject.into(),
            role,
            scopes: scopes.to_vec(),
            permissions,
            has_data_access,
        }
    }

    /// An unauthenticated or unrecognized subject.
    pub fn unknown(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: Role::Unknown,
            scopes: Vec::new(),
            permissions: Vec::new(),
            has_data_access: false,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Whether this principal may read record data from the named model.
    /// `read:<domain>` grants match the canonical model name
    /// case-insensitively; `read:all`/`write:all` match everything.
    pub fn can_access_model(&self, model_name: &str) -> bool {
        if !self.has_data_access {
            return false;
        }
        for scope in self.scopes.iter().map(|s| Scope::parse(s)) {
            match scope {
                Scope::ReadAll | Scope::WriteAll => return true,
                Scope::ReadDomain(domain) => {
                    if domain.eq_ignore_ascii_case(model_name) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }
}

fn push_unique(permissions: &mut Vec<Permission>, permission: Permission) {
    if !permissions.contains(&permission) {
        permissions.push(permission);
    }
}
