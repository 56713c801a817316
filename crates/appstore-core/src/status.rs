// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment status of an installed app.
//!
//! The status column is the only synchronization primitive between
//! deployment attempts, so every write goes through [`DeploymentStatus::transition`]
//! which checks the move against a static table.
//!
//! ```text
//!  ENQUEUED/QUE_ERROR ─┐
//!                      ▼
//!               ┌─────────────┐  git ok   ┌─────────────┐  acd ok   ┌─────────────┐
//!               │ DEPLOY_INIT │──────────►│ GIT_SUCCESS │──────────►│ ACD_SUCCESS │
//!               └─────────────┘           └─────────────┘           └──────┬──────┘
//!                  │      ▲                  │      ▲                      │
//!           git err│      │retry      acd err│      │retry                 ▼
//!                  ▼      │                  ▼      │             ┌────────────────┐
//!               ┌─────────────┐           ┌─────────────┐         │ DEPLOY_SUCCESS │
//!               │  GIT_ERROR  │           │  ACD_ERROR  │         └────────────────┘
//!               └─────────────┘           └─────────────┘          upgrade ⇒ DEPLOY_INIT
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of an installed app.
///
/// Discriminants are the wire values exposed to external consumers and stored
/// in `installed_apps.status`; their order must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum DeploymentStatus {
    /// Status could not be determined.
    WfUnknown = 0,
    /// Request accepted but no work started.
    RequestAccepted = 1,
    /// Payload published on the bulk deploy topic.
    Enqueued = 2,
    /// Publishing on the bulk deploy topic failed.
    QueError = 3,
    /// Consumer failed to dequeue the payload.
    DequeError = 4,
    /// Triggering the deployment failed.
    TriggerError = 5,
    /// All legs completed.
    DeploySuccess = 6,
    /// Database leg completed, nothing pushed yet.
    DeployInit = 7,
    /// Git leg failed.
    GitError = 8,
    /// Chart committed to Git.
    GitSuccess = 9,
    /// ArgoCD leg failed.
    AcdError = 10,
    /// ArgoCD application registered and created.
    AcdSuccess = 11,
}

/// Attempted a status move the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Current status.
    pub from: DeploymentStatus,
    /// Requested status.
    pub to: DeploymentStatus,
}

/// Unknown wire value or name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown deployment status: {0}")]
pub struct UnknownStatus(pub String);

use DeploymentStatus::*;

/// Allowed successors per status. Re-entering the same status is always allowed.
static TRANSITIONS: &[(DeploymentStatus, &[DeploymentStatus])] = &[
    (WfUnknown, &[DeployInit, Enqueued, QueError]),
    (RequestAccepted, &[DeployInit, Enqueued, QueError]),
    (DeployInit, &[Enqueued, QueError, GitSuccess, GitError]),
    (Enqueued, &[QueError, DeployInit, GitSuccess, GitError]),
    (QueError, &[Enqueued, DeployInit, GitSuccess, GitError]),
    (DequeError, &[GitSuccess, GitError, QueError, DeployInit]),
    (TriggerError, &[GitSuccess, GitError, QueError, DeployInit]),
    (GitError, &[GitSuccess, GitError, QueError, DeployInit]),
    (GitSuccess, &[AcdSuccess, AcdError, QueError, DeployInit]),
    (AcdError, &[AcdSuccess, QueError, DeployInit]),
    (AcdSuccess, &[DeploySuccess, QueError, DeployInit]),
    (DeploySuccess, &[DeployInit]),
];

impl DeploymentStatus {
    /// All statuses in wire order.
    pub const ALL: [DeploymentStatus; 12] = [
        WfUnknown,
        RequestAccepted,
        Enqueued,
        QueError,
        DequeError,
        TriggerError,
        DeploySuccess,
        DeployInit,
        GitError,
        GitSuccess,
        AcdError,
        AcdSuccess,
    ];

    /// Statuses from which the bulk path may still move a row to `ENQUEUED`/`QUE_ERROR`.
    pub const ENQUEUEABLE: [DeploymentStatus; 3] = [DeployInit, QueError, Enqueued];

    /// Wire value.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decode a wire value.
    pub fn from_code(code: i32) -> Result<Self, UnknownStatus> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.code() == code)
            .ok_or_else(|| UnknownStatus(code.to_string()))
    }

    /// Upper-case name used in API payloads and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            WfUnknown => "WF_UNKNOWN",
            RequestAccepted => "REQUEST_ACCEPTED",
            Enqueued => "ENQUEUED",
            QueError => "QUE_ERROR",
            DequeError => "DEQUE_ERROR",
            TriggerError => "TRIGGER_ERROR",
            DeploySuccess => "DEPLOY_SUCCESS",
            DeployInit => "DEPLOY_INIT",
            GitError => "GIT_ERROR",
            GitSuccess => "GIT_SUCCESS",
            AcdError => "ACD_ERROR",
            AcdSuccess => "ACD_SUCCESS",
        }
    }

    /// Statuses reachable from `self` in one step.
    pub fn successors(self) -> &'static [DeploymentStatus] {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    /// Whether `self -> next` is a legal move.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        self == next || self.successors().contains(&next)
    }

    /// Validate a move, returning the new status.
    pub fn transition(self, next: DeploymentStatus) -> Result<DeploymentStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// `*_ERROR` statuses, from which a new attempt may start.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            QueError | DequeError | TriggerError | GitError | AcdError
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Where the values of an installed app version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceValueKind {
    /// Chart default values of the app store version.
    #[default]
    Default,
    /// A saved values template.
    Template,
    /// Values of another deployed installed app version.
    Deployed,
    /// Values of an existing external release.
    Existing,
}

impl ReferenceValueKind {
    /// Name as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceValueKind::Default => "DEFAULT",
            ReferenceValueKind::Template => "TEMPLATE",
            ReferenceValueKind::Deployed => "DEPLOYED",
            ReferenceValueKind::Existing => "EXISTING",
        }
    }
}

impl fmt::Display for ReferenceValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceValueKind {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEFAULT" => Ok(ReferenceValueKind::Default),
            "TEMPLATE" => Ok(ReferenceValueKind::Template),
            "DEPLOYED" => Ok(ReferenceValueKind::Deployed),
            "EXISTING" => Ok(ReferenceValueKind::Existing),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// Both enums are stored as plain columns: the status as its INTEGER wire
// value, the reference kind as TEXT.
mod pg {
    use sqlx::encode::IsNull;
    use sqlx::error::BoxDynError;
    use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
    use sqlx::{Decode, Encode, Postgres, Type};

    use super::{DeploymentStatus, ReferenceValueKind};

    impl Type<Postgres> for DeploymentStatus {
        fn type_info() -> PgTypeInfo {
            <i32 as Type<Postgres>>::type_info()
        }

        fn compatible(ty: &PgTypeInfo) -> bool {
            <i32 as Type<Postgres>>::compatible(ty)
        }
    }

    impl<'r> Decode<'r, Postgres> for DeploymentStatus {
        fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
            let code = <i32 as Decode<Postgres>>::decode(value)?;
            Ok(DeploymentStatus::from_code(code)?)
        }
    }

    impl Encode<'_, Postgres> for DeploymentStatus {
        fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
            <i32 as Encode<Postgres>>::encode_by_ref(&self.code(), buf)
        }
    }

    impl Type<Postgres> for ReferenceValueKind {
        fn type_info() -> PgTypeInfo {
            <String as Type<Postgres>>::type_info()
        }

        fn compatible(ty: &PgTypeInfo) -> bool {
            <String as Type<Postgres>>::compatible(ty)
        }
    }

    impl<'r> Decode<'r, Postgres> for ReferenceValueKind {
        fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
            let name = <&str as Decode<Postgres>>::decode(value)?;
            Ok(name.parse()?)
        }
    }

    impl Encode<'_, Postgres> for ReferenceValueKind {
        fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
            <&str as Encode<Postgres>>::encode_by_ref(&self.as_str(), buf)
        }
    }
}
