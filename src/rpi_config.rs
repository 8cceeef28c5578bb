//! Layered configuration for the engine and supervisor.
//!
//! Settings are read from `.agents/rpi/rpi.toml`, overlaid with environment
//! variables, then with CLI flags. The result is resolved once per invocation into
//! an `EngineOptions` and a `SupervisorConfig`, which are passed down explicitly.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! max_retries = 3
//! phase_timeout = "90m"
//! stall_timeout = "10m"
//! stream_startup_timeout = "45s"
//! runtime = "auto"            # auto | direct | stream
//! runtime_command = "claude"
//! swarm_first = true
//! policy_mode = "off"         # off | observe | enforce
//!
//! [supervisor]
//! failure_policy = "stop"     # stop | continue
//! cycle_retries = 0
//! retry_backoff = "30s"
//! cycle_delay = "0"
//! lease = false
//! lease_ttl = "2m"
//! gate_policy = "off"         # off | best-effort | required
//! gate_scripts = ["scripts/validate-go-fast.sh", "scripts/security-gate.sh"]
//! landing_policy = "off"      # off | commit | sync-push
//! landing_commit_message = "chore(rpi): autonomous cycle {{cycle}}"
//! bd_sync_policy = "auto"     # auto | always | never
//! command_timeout = "20m"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::gates::PolicyMode;
use crate::util::{duration_str, parse_duration};

pub const CONFIG_FILE: &str = "rpi.toml";
pub const DEFAULT_COMMIT_MESSAGE: &str = "chore(rpi): autonomous cycle {{cycle}}";

macro_rules! choice_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal, $valid:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ConfigError::InvalidChoice {
                        field: $field,
                        value: s.to_string(),
                        valid: $valid,
                    }),
                }
            }
        }
    };
}

choice_enum!(
    /// Which executor backend runs agent sessions.
    RuntimeMode, "runtime", "auto|direct|stream", {
        Auto => "auto",
        Direct => "direct",
        Stream => "stream",
    }
);

choice_enum!(
    /// What the supervisor does after a cycle exhausts its attempts.
    FailurePolicy, "failure-policy", "stop|continue", {
        Stop => "stop",
        Continue => "continue",
    }
);

choice_enum!(
    /// How quality gate scripts affect a cycle.
    GatePolicy, "gate-policy", "off|best-effort|required", {
        Off => "off",
        BestEffort => "best-effort",
        Required => "required",
    }
);

choice_enum!(
    /// How a successful cycle's changes are landed.
    LandingPolicy, "landing-policy", "off|commit|sync-push", {
        Off => "off",
        Commit => "commit",
        SyncPush => "sync-push",
    }
);

choice_enum!(
    /// When to run the issue tracker's sync before pushing.
    BdSyncPolicy, "bd-sync-policy", "auto|always|never", {
        Auto => "auto",
        Always => "always",
        Never => "never",
    }
);

/// Engine settings as read from one configuration layer. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub max_retries: Option<i64>,
    #[serde(default)]
    pub phase_timeout: Option<String>,
    #[serde(default)]
    pub stall_timeout: Option<String>,
    #[serde(default)]
    pub stream_startup_timeout: Option<String>,
    #[serde(default)]
    pub stall_check_interval: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub runtime_command: Option<String>,
    #[serde(default)]
    pub ao_command: Option<String>,
    #[serde(default)]
    pub bd_command: Option<String>,
    #[serde(default)]
    pub swarm_first: Option<bool>,
    #[serde(default)]
    pub test_first: Option<bool>,
    #[serde(default)]
    pub fast_path: Option<bool>,
    #[serde(default)]
    pub interactive: Option<bool>,
    #[serde(default)]
    pub live_status: Option<bool>,
    #[serde(default)]
    pub policy_mode: Option<String>,
}

/// Supervisor settings as read from one configuration layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default)]
    pub max_cycles: Option<i64>,
    #[serde(default)]
    pub failure_policy: Option<String>,
    #[serde(default)]
    pub cycle_retries: Option<i64>,
    #[serde(default)]
    pub retry_backoff: Option<String>,
    #[serde(default)]
    pub cycle_delay: Option<String>,
    #[serde(default)]
    pub lease: Option<bool>,
    #[serde(default)]
    pub lease_path: Option<PathBuf>,
    #[serde(default)]
    pub lease_ttl: Option<String>,
    #[serde(default)]
    pub gate_policy: Option<String>,
    #[serde(default)]
    pub gate_scripts: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub landing_policy: Option<String>,
    #[serde(default)]
    pub landing_branch: Option<String>,
    #[serde(default)]
    pub landing_commit_message: Option<String>,
    #[serde(default)]
    pub landing_lock_path: Option<PathBuf>,
    #[serde(default)]
    pub bd_sync_policy: Option<String>,
    #[serde(default)]
    pub command_timeout: Option<String>,
    #[serde(default)]
    pub kill_switch_path: Option<PathBuf>,
    #[serde(default)]
    pub repo_filter: Option<String>,
}

/// Contents of `rpi.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpiToml {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
}

impl RpiToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse rpi.toml")
    }

    /// Load `rpi.toml` from the state directory, or defaults if absent.
    pub fn load_or_default(rpi_dir: &Path) -> Result<Self> {
        let path = rpi_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

impl EngineSettings {
    /// Values from `RPI_*` environment variables.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            runtime: var("RPI_RUNTIME"),
            runtime_command: var("RPI_RUNTIME_COMMAND"),
            ao_command: var("RPI_AO_COMMAND"),
            bd_command: var("RPI_BD_COMMAND"),
            policy_mode: var("RPI_POLICY_MODE"),
            ..Self::default()
        }
    }

    /// Overlay `higher` on top of `self`; set fields in `higher` win.
    pub fn merge(self, higher: EngineSettings) -> EngineSettings {
        EngineSettings {
            max_retries: higher.max_retries.or(self.max_retries),
            phase_timeout: higher.phase_timeout.or(self.phase_timeout),
            stall_timeout: higher.stall_timeout.or(self.stall_timeout),
            stream_startup_timeout: higher.stream_startup_timeout.or(self.stream_startup_timeout),
            stall_check_interval: higher.stall_check_interval.or(self.stall_check_interval),
            runtime: higher.runtime.or(self.runtime),
            runtime_command: higher.runtime_command.or(self.runtime_command),
            ao_command: higher.ao_command.or(self.ao_command),
            bd_command: higher.bd_command.or(self.bd_command),
            swarm_first: higher.swarm_first.or(self.swarm_first),
            test_first: higher.test_first.or(self.test_first),
            fast_path: higher.fast_path.or(self.fast_path),
            interactive: higher.interactive.or(self.interactive),
            live_status: higher.live_status.or(self.live_status),
            policy_mode: higher.policy_mode.or(self.policy_mode),
        }
    }

    /// Validate and resolve into engine options. No side effects.
    pub fn resolve(&self, dry_run: bool) -> Result<EngineOptions, ConfigError> {
        let defaults = EngineOptions::default();
        let max_retries = non_negative("max-retries", self.max_retries, defaults.max_retries)?;
        let policy_mode = match &self.policy_mode {
            Some(raw) => raw.parse::<PolicyMode>().map_err(|_| ConfigError::InvalidChoice {
                field: "policy-mode",
                value: raw.clone(),
                valid: "off|observe|enforce",
            })?,
            None => defaults.policy_mode,
        };
        Ok(EngineOptions {
            max_retries,
            phase_timeout: duration_or("phase-timeout", &self.phase_timeout, defaults.phase_timeout)?,
            stall_timeout: duration_or("stall-timeout", &self.stall_timeout, defaults.stall_timeout)?,
            stream_startup_timeout: duration_or(
                "stream-startup-timeout",
                &self.stream_startup_timeout,
                defaults.stream_startup_timeout,
            )?,
            stall_check_interval: duration_or(
                "stall-check-interval",
                &self.stall_check_interval,
                defaults.stall_check_interval,
            )?,
            runtime_mode: match &self.runtime {
                Some(raw) => raw.parse()?,
                None => defaults.runtime_mode,
            },
            runtime_command: non_empty_or(&self.runtime_command, &defaults.runtime_command),
            ao_command: non_empty_or(&self.ao_command, &defaults.ao_command),
            bd_command: non_empty_or(&self.bd_command, &defaults.bd_command),
            swarm_first: self.swarm_first.unwrap_or(defaults.swarm_first),
            test_first: self.test_first.unwrap_or(defaults.test_first),
            fast_path: self.fast_path.unwrap_or(defaults.fast_path),
            interactive: self.interactive.unwrap_or(defaults.interactive),
            live_status: self.live_status.unwrap_or(defaults.live_status),
            policy_mode,
            dry_run,
        })
    }
}

impl SupervisorSettings {
    pub fn merge(self, higher: SupervisorSettings) -> SupervisorSettings {
        SupervisorSettings {
            max_cycles: higher.max_cycles.or(self.max_cycles),
            failure_policy: higher.failure_policy.or(self.failure_policy),
            cycle_retries: higher.cycle_retries.or(self.cycle_retries),
            retry_backoff: higher.retry_backoff.or(self.retry_backoff),
            cycle_delay: higher.cycle_delay.or(self.cycle_delay),
            lease: higher.lease.or(self.lease),
            lease_path: higher.lease_path.or(self.lease_path),
            lease_ttl: higher.lease_ttl.or(self.lease_ttl),
            gate_policy: higher.gate_policy.or(self.gate_policy),
            gate_scripts: higher.gate_scripts.or(self.gate_scripts),
            landing_policy: higher.landing_policy.or(self.landing_policy),
            landing_branch: higher.landing_branch.or(self.landing_branch),
            landing_commit_message: higher.landing_commit_message.or(self.landing_commit_message),
            landing_lock_path: higher.landing_lock_path.or(self.landing_lock_path),
            bd_sync_policy: higher.bd_sync_policy.or(self.bd_sync_policy),
            command_timeout: higher.command_timeout.or(self.command_timeout),
            kill_switch_path: higher.kill_switch_path.or(self.kill_switch_path),
            repo_filter: higher.repo_filter.or(self.repo_filter),
        }
    }

    /// Validate and resolve into a supervisor config.
    ///
    /// `supervisor_mode` switches the defaults of unset fields to the autonomous
    /// profile: lease on, continue on failure, one cycle retry, 5m between cycles,
    /// required gates. Relative paths resolve against `project_dir`.
    pub fn resolve(
        &self,
        project_dir: &Path,
        supervisor_mode: bool,
    ) -> Result<SupervisorConfig, ConfigError> {
        let max_cycles = non_negative("max-cycles", self.max_cycles, 0)?;
        let cycle_retries = non_negative(
            "cycle-retries",
            self.cycle_retries,
            if supervisor_mode { 1 } else { 0 },
        )?;

        let failure_policy = match &self.failure_policy {
            Some(raw) => raw.parse()?,
            None if supervisor_mode => FailurePolicy::Continue,
            None => FailurePolicy::Stop,
        };
        let gate_policy = match &self.gate_policy {
            Some(raw) => raw.parse()?,
            None if supervisor_mode => GatePolicy::Required,
            None => GatePolicy::Off,
        };
        let landing_policy = match &self.landing_policy {
            Some(raw) => raw.parse()?,
            None => LandingPolicy::Off,
        };
        let bd_sync_policy = match &self.bd_sync_policy {
            Some(raw) => raw.parse()?,
            None => BdSyncPolicy::Auto,
        };

        let cycle_delay_default = if supervisor_mode {
            Duration::from_secs(5 * 60)
        } else {
            Duration::ZERO
        };
        let mut lease_ttl = duration_or("lease-ttl", &self.lease_ttl, Duration::ZERO)?;
        if lease_ttl.is_zero() {
            lease_ttl = Duration::from_secs(120);
        }
        let mut command_timeout =
            duration_or("command-timeout", &self.command_timeout, Duration::ZERO)?;
        if command_timeout.is_zero() {
            command_timeout = Duration::from_secs(20 * 60);
        }

        let resolve_path = |p: Option<&PathBuf>, default: &str| -> PathBuf {
            let p = p.cloned().unwrap_or_else(|| PathBuf::from(default));
            if p.is_absolute() { p } else { project_dir.join(p) }
        };

        let commit_message = self
            .landing_commit_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_COMMIT_MESSAGE)
            .to_string();

        Ok(SupervisorConfig {
            max_cycles,
            failure_policy,
            cycle_retries,
            retry_backoff: duration_or(
                "retry-backoff",
                &self.retry_backoff,
                Duration::from_secs(30),
            )?,
            cycle_delay: duration_or("cycle-delay", &self.cycle_delay, cycle_delay_default)?,
            lease_enabled: self.lease.unwrap_or(supervisor_mode),
            lease_path: resolve_path(self.lease_path.as_ref(), ".agents/rpi/supervisor.lock"),
            lease_ttl,
            gate_policy,
            gate_scripts: self
                .gate_scripts
                .clone()
                .unwrap_or_else(|| {
                    vec![
                        PathBuf::from("scripts/validate-go-fast.sh"),
                        PathBuf::from("scripts/security-gate.sh"),
                    ]
                })
                .into_iter()
                .map(|p| if p.is_absolute() { p } else { project_dir.join(p) })
                .collect(),
            landing_policy,
            landing_branch: self
                .landing_branch
                .as_deref()
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string),
            commit_message,
            landing_lock_path: resolve_path(
                self.landing_lock_path.as_ref(),
                ".agents/rpi/landing.lock",
            ),
            bd_sync_policy,
            command_timeout,
            kill_switch_path: resolve_path(self.kill_switch_path.as_ref(), ".agents/rpi/KILL"),
            repo_filter: self.repo_filter.clone().filter(|r| !r.trim().is_empty()),
        })
    }
}

fn non_negative(field: &'static str, value: Option<i64>, default: u32) -> Result<u32, ConfigError> {
    match value {
        Some(n) if n < 0 => Err(ConfigError::Negative { field }),
        Some(n) => u32::try_from(n).map_err(|_| ConfigError::OutOfRange {
            field,
            value: n,
            max: u32::MAX,
        }),
        None => Ok(default),
    }
}

fn duration_or(
    field: &'static str,
    raw: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(value) if value.trim().starts_with('-') => Err(ConfigError::Negative { field }),
        Some(value) => parse_duration(value).map_err(|e| ConfigError::InvalidDuration {
            field,
            value: value.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn non_empty_or(value: &Option<String>, default: &str) -> String {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Resolved engine options. Persisted with the run state as `opts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub max_retries: u32,
    #[serde(with = "duration_str")]
    pub phase_timeout: Duration,
    #[serde(with = "duration_str")]
    pub stall_timeout: Duration,
    #[serde(with = "duration_str")]
    pub stream_startup_timeout: Duration,
    #[serde(with = "duration_str")]
    pub stall_check_interval: Duration,
    pub runtime_mode: RuntimeMode,
    pub runtime_command: String,
    pub ao_command: String,
    pub bd_command: String,
    pub swarm_first: bool,
    pub test_first: bool,
    pub fast_path: bool,
    pub interactive: bool,
    pub live_status: bool,
    pub policy_mode: PolicyMode,
    #[serde(skip_serializing)]
    pub dry_run: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            phase_timeout: Duration::from_secs(90 * 60),
            stall_timeout: Duration::from_secs(10 * 60),
            stream_startup_timeout: Duration::from_secs(45),
            stall_check_interval: Duration::from_secs(30),
            runtime_mode: RuntimeMode::Auto,
            runtime_command: "claude".to_string(),
            ao_command: "ao".to_string(),
            bd_command: "bd".to_string(),
            swarm_first: true,
            test_first: false,
            fast_path: false,
            interactive: false,
            live_status: false,
            policy_mode: PolicyMode::Off,
            dry_run: false,
        }
    }
}

/// Resolved supervisor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Maximum cycles to run; 0 means until the queue is empty.
    pub max_cycles: u32,
    pub failure_policy: FailurePolicy,
    pub cycle_retries: u32,
    pub retry_backoff: Duration,
    pub cycle_delay: Duration,
    pub lease_enabled: bool,
    pub lease_path: PathBuf,
    pub lease_ttl: Duration,
    pub gate_policy: GatePolicy,
    pub gate_scripts: Vec<PathBuf>,
    pub landing_policy: LandingPolicy,
    pub landing_branch: Option<String>,
    pub commit_message: String,
    pub landing_lock_path: PathBuf,
    pub bd_sync_policy: BdSyncPolicy,
    pub command_timeout: Duration,
    pub kill_switch_path: PathBuf,
    pub repo_filter: Option<String>,
}

impl SupervisorConfig {
    pub fn max_cycle_attempts(&self) -> u32 {
        self.cycle_retries + 1
    }

    pub fn continue_after_failure(&self) -> bool {
        self.failure_policy == FailurePolicy::Continue
    }

    /// Render the landing commit message for a cycle.
    pub fn render_commit_message(&self, cycle: u32, attempt: u32, goal: &str) -> String {
        self.commit_message
            .replace("{{cycle}}", &cycle.to_string())
            .replace("{{attempt}}", &attempt.to_string())
            .replace("{{goal}}", goal.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_engine_defaults() {
        let opts = EngineSettings::default().resolve(false).unwrap();
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.phase_timeout, Duration::from_secs(5400));
        assert_eq!(opts.stall_timeout, Duration::from_secs(600));
        assert_eq!(opts.stream_startup_timeout, Duration::from_secs(45));
        assert_eq!(opts.runtime_mode, RuntimeMode::Auto);
        assert_eq!(opts.runtime_command, "claude");
        assert!(opts.swarm_first);
        assert_eq!(opts.policy_mode, PolicyMode::Off);
    }

    #[test]
    fn test_parse_engine_section() {
        let toml = RpiToml::parse(
            r#"
[engine]
max_retries = 5
phase_timeout = "2h"
runtime = "stream"
runtime_command = "my-agent"
"#,
        )
        .unwrap();
        let opts = toml.engine.resolve(false).unwrap();
        assert_eq!(opts.max_retries, 5);
        assert_eq!(opts.phase_timeout, Duration::from_secs(7200));
        assert_eq!(opts.runtime_mode, RuntimeMode::Stream);
        assert_eq!(opts.runtime_command, "my-agent");
    }

    #[test]
    fn test_cli_layer_wins_over_file() {
        let file = EngineSettings {
            max_retries: Some(5),
            runtime_command: Some("file-agent".into()),
            ..Default::default()
        };
        let cli = EngineSettings {
            max_retries: Some(1),
            ..Default::default()
        };
        let opts = file.merge(cli).resolve(true).unwrap();
        assert_eq!(opts.max_retries, 1);
        assert_eq!(opts.runtime_command, "file-agent");
        assert!(opts.dry_run);
    }

    #[test]
    fn test_invalid_runtime_is_config_error() {
        let settings = EngineSettings {
            runtime: Some("tmux".into()),
            ..Default::default()
        };
        let err = settings.resolve(false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid runtime \"tmux\" (valid: auto|direct|stream)"
        );
    }

    #[test]
    fn test_negative_max_retries_rejected() {
        let settings = EngineSettings {
            max_retries: Some(-1),
            ..Default::default()
        };
        assert!(matches!(
            settings.resolve(false),
            Err(ConfigError::Negative { field: "max-retries" })
        ));
    }

    #[test]
    fn test_oversized_counts_rejected_instead_of_wrapping() {
        let settings = EngineSettings {
            max_retries: Some(4_294_967_297),
            ..Default::default()
        };
        let err = settings.resolve(false).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "max-retries",
                value: 4_294_967_297,
                ..
            }
        ));

        let dir = tempdir().unwrap();
        let settings = SupervisorSettings {
            max_cycles: Some(i64::from(u32::MAX) + 1),
            ..Default::default()
        };
        assert!(matches!(
            settings.resolve(dir.path(), false),
            Err(ConfigError::OutOfRange { field: "max-cycles", .. })
        ));
    }

    #[test]
    fn test_supervisor_plain_defaults() {
        let dir = tempdir().unwrap();
        let cfg = SupervisorSettings::default().resolve(dir.path(), false).unwrap();
        assert_eq!(cfg.failure_policy, FailurePolicy::Stop);
        assert_eq!(cfg.max_cycle_attempts(), 1);
        assert_eq!(cfg.gate_policy, GatePolicy::Off);
        assert_eq!(cfg.landing_policy, LandingPolicy::Off);
        assert!(!cfg.lease_enabled);
        assert_eq!(cfg.lease_ttl, Duration::from_secs(120));
        assert_eq!(cfg.command_timeout, Duration::from_secs(1200));
        assert_eq!(cfg.retry_backoff, Duration::from_secs(30));
        assert_eq!(cfg.lease_path, dir.path().join(".agents/rpi/supervisor.lock"));
        assert_eq!(cfg.kill_switch_path, dir.path().join(".agents/rpi/KILL"));
    }

    #[test]
    fn test_supervisor_mode_defaults() {
        let dir = tempdir().unwrap();
        let cfg = SupervisorSettings::default().resolve(dir.path(), true).unwrap();
        assert!(cfg.lease_enabled);
        assert!(cfg.continue_after_failure());
        assert_eq!(cfg.max_cycle_attempts(), 2);
        assert_eq!(cfg.cycle_delay, Duration::from_secs(300));
        assert_eq!(cfg.gate_policy, GatePolicy::Required);
    }

    #[test]
    fn test_supervisor_mode_respects_explicit_values() {
        let dir = tempdir().unwrap();
        let settings = SupervisorSettings {
            lease: Some(false),
            failure_policy: Some("stop".into()),
            cycle_delay: Some("0".into()),
            ..Default::default()
        };
        let cfg = settings.resolve(dir.path(), true).unwrap();
        assert!(!cfg.lease_enabled);
        assert_eq!(cfg.failure_policy, FailurePolicy::Stop);
        assert_eq!(cfg.cycle_delay, Duration::ZERO);
    }

    #[test]
    fn test_invalid_landing_policy_message() {
        let dir = tempdir().unwrap();
        let settings = SupervisorSettings {
            landing_policy: Some("yolo".into()),
            ..Default::default()
        };
        let err = settings.resolve(dir.path(), false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid landing-policy \"yolo\" (valid: off|commit|sync-push)"
        );
    }

    #[test]
    fn test_negative_values_rejected() {
        let dir = tempdir().unwrap();
        let settings = SupervisorSettings {
            cycle_retries: Some(-2),
            ..Default::default()
        };
        assert!(matches!(
            settings.resolve(dir.path(), false),
            Err(ConfigError::Negative { field: "cycle-retries" })
        ));

        let settings = SupervisorSettings {
            retry_backoff: Some("-5s".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.resolve(dir.path(), false),
            Err(ConfigError::Negative { field: "retry-backoff" })
        ));
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let dir = tempdir().unwrap();
        let settings = SupervisorSettings {
            lease_path: Some(PathBuf::from("/var/lock/rpi.lock")),
            ..Default::default()
        };
        let cfg = settings.resolve(dir.path(), false).unwrap();
        assert_eq!(cfg.lease_path, PathBuf::from("/var/lock/rpi.lock"));
    }

    #[test]
    fn test_render_commit_message() {
        let dir = tempdir().unwrap();
        let settings = SupervisorSettings {
            landing_commit_message: Some("rpi {{cycle}}.{{attempt}}: {{goal}}".into()),
            ..Default::default()
        };
        let cfg = settings.resolve(dir.path(), false).unwrap();
        assert_eq!(cfg.render_commit_message(4, 2, " add auth "), "rpi 4.2: add auth");

        let default = SupervisorSettings::default().resolve(dir.path(), false).unwrap();
        assert_eq!(
            default.render_commit_message(7, 1, "x"),
            "chore(rpi): autonomous cycle 7"
        );
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = RpiToml::load_or_default(dir.path()).unwrap();
        assert!(toml.engine.max_retries.is_none());
    }

    #[test]
    fn test_engine_options_serialize_durations_as_strings() {
        let json = serde_json::to_value(EngineOptions::default()).unwrap();
        assert_eq!(json["phase_timeout"], "1h30m");
        assert_eq!(json["runtime_mode"], "auto");
        assert!(json.get("dry_run").is_none());
    }
}
