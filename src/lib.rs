//! On-demand diagnostic endpoint toggling.
//!
//! A [`Toggler`] polls a fixed set of [`Rule`]s and keeps a diagnostic HTTP
//! listener up only while at least one of them matches. Operators can take
//! over with [`Toggler::force_start`], [`Toggler::force_stop`] or
//! [`Toggler::toggle`], which permanently switches the instance to manual
//! control.

pub mod toggle;

pub use toggle::engine::{evaluate, Evaluation};
pub use toggle::rules::{EnvVarRule, FlagRule, Rule, YamlFileRule};
pub use toggle::service::{ControlledService, ListenConfig, ServiceError};
pub use toggle::toggler::{Mode, ToggleError, Toggler, TogglerConfig, MIN_POLL_INTERVAL};
pub use tokio_util::sync::CancellationToken;
