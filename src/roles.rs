//! Role hierarchy and the permission checks run before every command.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Station roles, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  #[default]
  Member,
  Officer,
  Chief,
  Admin,
}

impl Role {
  /// True if this role is `required` or above it in the hierarchy.
  pub fn has_at_least(self, required: Role) -> bool {
    self >= required
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Role::Member => "member",
      Role::Officer => "officer",
      Role::Chief => "chief",
      Role::Admin => "admin",
    };
    f.write_str(name)
  }
}

/// Actions guarded by a minimum role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
  SubmitChecklist,
  DrainQueue,
  ViewStock,
  DiscardSubmission,
  PurgeCache,
}

impl Permission {
  pub fn required_role(self) -> Role {
    match self {
      Permission::SubmitChecklist | Permission::DrainQueue | Permission::ViewStock => Role::Member,
      Permission::DiscardSubmission | Permission::PurgeCache => Role::Officer,
    }
  }
}

/// Fail unless `role` is allowed to perform `permission`.
pub fn authorize(role: Role, permission: Permission) -> Result<()> {
  let required = permission.required_role();
  if role.has_at_least(required) {
    Ok(())
  } else {
    Err(eyre!(
      "Role '{}' may not perform {:?} (requires '{}' or above)",
      role,
      permission,
      required
    ))
  }
}
