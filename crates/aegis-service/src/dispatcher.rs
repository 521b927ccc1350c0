//! Request dispatcher: maps protocol commands onto the vault and the gate.
//!
//! The dispatcher is transport-agnostic.  The server hands it one decoded
//! [`ServiceRequest`] at a time and writes back whatever [`ServiceResponse`]
//! it returns; every failure becomes a response, never a dropped connection.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{Value, json};

use aegis_vault::GenesisVault;

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::governance::GovernanceGate;
use crate::logs;
use crate::protocol::{Command, ServiceRequest, ServiceResponse, Status};

/// Longest development unlock window, in minutes.
pub const MAX_DEV_UNLOCK_MINUTES: i64 = 24 * 60;

/// Longest command name echoed back in a not-found message.
const MAX_ECHOED_COMMAND: usize = 64;

/// Shared, clonable request handler.
#[derive(Clone)]
pub struct Dispatcher {
    vault: GenesisVault,
    gate: Arc<GovernanceGate>,
    config: Arc<ServiceConfig>,
}

impl Dispatcher {
    pub fn new(vault: GenesisVault, gate: Arc<GovernanceGate>, config: ServiceConfig) -> Self {
        Self {
            vault,
            gate,
            config: Arc::new(config),
        }
    }

    /// The governance gate this dispatcher consults.
    pub fn gate(&self) -> &Arc<GovernanceGate> {
        &self.gate
    }

    /// Handle one request.
    pub async fn dispatch(&self, request: ServiceRequest) -> ServiceResponse {
        let Some(command) = Command::parse(&request.command) else {
            let echoed: String = request.command.chars().take(MAX_ECHOED_COMMAND).collect();
            tracing::warn!(command = %echoed, "unknown command");
            let err = ServiceError::UnknownCommand { command: echoed };
            return ServiceResponse::failure(err.status(), err.public_message());
        };

        match self.handle(command, &request).await {
            Ok(value) => {
                tracing::info!(%command, "request processed");
                ServiceResponse::ok(value)
            }
            Err(err) => {
                let status = err.status();
                if status == Status::InternalError {
                    tracing::error!(%command, error = %err, "request failed");
                } else {
                    tracing::warn!(%command, status = status.code(), error = %err, "request refused");
                }
                ServiceResponse::failure(status, err.public_message())
            }
        }
    }

    async fn handle(&self, command: Command, request: &ServiceRequest) -> Result<Value> {
        // Nothing that can release or destroy the secret runs while locked.
        if command.requires_unlock() && !self.gate.is_unlocked() {
            return Err(ServiceError::Locked);
        }

        match command {
            Command::Ping => Ok(json!({ "status": "ok", "utc": Utc::now() })),
            Command::GetDeviceInfo => {
                let device = self.vault.device_info().await?;
                Ok(json!({ "device": device }))
            }
            Command::HasMnemonic => {
                let has = self.vault.has_mnemonic().await?;
                let device = self.vault.device_info().await?;
                Ok(json!({ "hasMnemonic": has, "deviceId": device.device_id }))
            }
            Command::GetMnemonic => {
                let phrase = self.vault.get_or_create_mnemonic().await?;
                // The window may have closed while the request waited on the vault.
                if !self.gate.is_unlocked() {
                    return Err(ServiceError::Locked);
                }
                tracing::warn!("mnemonic released while unlocked");
                Ok(json!({ "mnemonic": phrase.as_str() }))
            }
            Command::SetMnemonic => self.set_mnemonic(request).await,
            Command::DeleteMnemonic => {
                let deleted = self.vault.delete_mnemonic().await?;
                Ok(json!({ "deleted": deleted }))
            }
            Command::UnlockForDevelopment => self.unlock_for_development(request),
            Command::Lock => {
                self.gate.lock();
                Ok(json!({ "status": "locked" }))
            }
            Command::GetLockStatus => Ok(json!({
                "unlocked": self.gate.is_unlocked(),
                "expiresAt": self.gate.expires_at(),
            })),
            Command::GetRecentLogs => {
                let limit = logs::clamp_limit(optional_int(request, "limit")?);
                let lines = logs::tail(&self.config.log_file, limit).await?;
                Ok(json!({ "lines": lines }))
            }
        }
    }

    async fn set_mnemonic(&self, request: &ServiceRequest) -> Result<Value> {
        let phrase = request
            .param("mnemonic")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ServiceError::bad_request("mnemonic is required"))?;

        let shares = self.vault.set_mnemonic(phrase).await?;
        Ok(json!({
            "success": true,
            "message": format!("genesis key stored; {} shares generated", shares.len()),
            "shares": shares,
        }))
    }

    fn unlock_for_development(&self, request: &ServiceRequest) -> Result<Value> {
        if !self.config.allow_dev_bypass_unlock {
            return Err(ServiceError::forbidden("dev unlock is disabled"));
        }

        let minutes = optional_int(request, "minutes")?
            .unwrap_or(i64::from(self.config.default_unlock_minutes))
            .clamp(1, MAX_DEV_UNLOCK_MINUTES);
        let expires_at = self.gate.unlock(Duration::minutes(minutes));
        tracing::warn!(minutes, %expires_at, "development unlock granted");

        Ok(json!({ "status": "unlocked", "expiresAt": expires_at }))
    }
}

/// Read an optional integer parameter.
fn optional_int(request: &ServiceRequest, key: &str) -> Result<Option<i64>> {
    match request.param(key) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| ServiceError::bad_request(format!("{key} must be an integer"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::{Clock, ManualClock};
    use aegis_vault::{EphemeralProtector, VaultConfig};

    const PHRASE: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";

    struct Fixture {
        dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        dispatcher: Dispatcher,
    }

    fn fixture(config: ServiceConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let vault = GenesisVault::new(
            VaultConfig::new(dir.path().join("data")),
            Box::new(EphemeralProtector::new().unwrap()),
        )
        .unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gate = Arc::new(GovernanceGate::new(clock.clone()));
        let config = config.with_log_file(dir.path().join("service.log"));
        Fixture {
            clock,
            dispatcher: Dispatcher::new(vault, gate, config),
            dir,
        }
    }

    async fn send(d: &Dispatcher, req: ServiceRequest) -> ServiceResponse {
        d.dispatch(req).await
    }

    #[tokio::test]
    async fn ping() {
        let f = fixture(ServiceConfig::default());
        let resp = send(&f.dispatcher, ServiceRequest::new("ping")).await;
        assert!(resp.success);
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.value.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let f = fixture(ServiceConfig::default());
        let resp = send(&f.dispatcher, ServiceRequest::new("launch_rocket")).await;
        assert_eq!(resp.status, Status::NotFound);
        assert_eq!(resp.status_code, 404);
        assert!(resp.error_message.unwrap().contains("launch_rocket"));
    }

    #[tokio::test]
    async fn dev_unlock_refused_by_default() {
        let f = fixture(ServiceConfig::default());
        for minutes in [1, 5, 60, 0, -1] {
            let resp = send(
                &f.dispatcher,
                ServiceRequest::new("unlock_for_development").with_param("minutes", minutes),
            )
            .await;
            assert_eq!(resp.status, Status::Forbidden);
        }
        assert!(!f.dispatcher.gate().is_unlocked());
    }

    #[tokio::test]
    async fn dev_unlock_minutes() {
        let f = fixture(ServiceConfig::default().with_dev_unlock(true));
        let start = f.clock.now();

        let resp = send(&f.dispatcher, ServiceRequest::new("unlockdev")).await;
        assert!(resp.success);
        let expected = start + Duration::minutes(15);
        assert_eq!(
            resp.value.unwrap()["expiresAt"],
            serde_json::to_value(expected).unwrap()
        );

        send(
            &f.dispatcher,
            ServiceRequest::new("unlockdev").with_param("minutes", 0),
        )
        .await;
        assert_eq!(f.dispatcher.gate().expires_at(), Some(start + Duration::minutes(1)));

        let resp = send(
            &f.dispatcher,
            ServiceRequest::new("unlockdev").with_param("minutes", "ten"),
        )
        .await;
        assert_eq!(resp.status, Status::BadRequest);
    }

    #[tokio::test]
    async fn locked_get_mnemonic_touches_nothing() {
        let f = fixture(ServiceConfig::default());
        let resp = send(&f.dispatcher, ServiceRequest::new("get_mnemonic")).await;
        assert_eq!(resp.status, Status::Locked);
        assert_eq!(resp.status_code, 423);
        assert!(resp.value.is_none());

        // No key, metadata or envelope was created.
        assert!(!f.dir.path().join("data").exists());
    }

    #[tokio::test]
    async fn set_mnemonic_statuses() {
        let f = fixture(ServiceConfig::default());

        let resp = send(&f.dispatcher, ServiceRequest::new("set_mnemonic")).await;
        assert_eq!(resp.status, Status::BadRequest);

        let resp = send(
            &f.dispatcher,
            ServiceRequest::new("set_mnemonic").with_param("mnemonic", "one two three"),
        )
        .await;
        assert_eq!(resp.status, Status::BadRequest);

        let resp = send(
            &f.dispatcher,
            ServiceRequest::new("set_mnemonic").with_param("mnemonic", PHRASE),
        )
        .await;
        assert!(resp.success);
        assert_eq!(resp.value.unwrap()["shares"].as_array().unwrap().len(), 5);

        let resp = send(
            &f.dispatcher,
            ServiceRequest::new("set_mnemonic").with_param("mnemonic", PHRASE),
        )
        .await;
        assert_eq!(resp.status, Status::Conflict);
        assert_eq!(resp.status_code, 409);
    }

    #[tokio::test]
    async fn delete_is_gated() {
        let f = fixture(ServiceConfig::default().with_dev_unlock(true));
        send(
            &f.dispatcher,
            ServiceRequest::new("set_mnemonic").with_param("mnemonic", PHRASE),
        )
        .await;

        let resp = send(&f.dispatcher, ServiceRequest::new("delete_mnemonic")).await;
        assert_eq!(resp.status, Status::Locked);

        send(&f.dispatcher, ServiceRequest::new("unlockdev")).await;
        let resp = send(&f.dispatcher, ServiceRequest::new("delete_mnemonic")).await;
        assert!(resp.success);
        assert_eq!(resp.value.unwrap()["deleted"], true);

        let resp = send(&f.dispatcher, ServiceRequest::new("has_mnemonic")).await;
        assert_eq!(resp.value.unwrap()["hasMnemonic"], false);
    }

    #[tokio::test]
    async fn lock_status_reflects_gate() {
        let f = fixture(ServiceConfig::default().with_dev_unlock(true));
        let resp = send(&f.dispatcher, ServiceRequest::new("get_lock_status")).await;
        let value = resp.value.unwrap();
        assert_eq!(value["unlocked"], false);
        assert!(value["expiresAt"].is_null());

        send(&f.dispatcher, ServiceRequest::new("unlockdev")).await;
        let resp = send(&f.dispatcher, ServiceRequest::new("getlockstatus")).await;
        assert_eq!(resp.value.unwrap()["unlocked"], true);

        let resp = send(&f.dispatcher, ServiceRequest::new("lock")).await;
        assert_eq!(resp.value.unwrap()["status"], "locked");
        assert!(!f.dispatcher.gate().is_unlocked());
    }

    #[tokio::test]
    async fn recent_logs() {
        let f = fixture(ServiceConfig::default());

        let resp = send(&f.dispatcher, ServiceRequest::new("get_recent_logs")).await;
        assert!(resp.success);
        assert_eq!(resp.value.unwrap()["lines"], json!([]));

        std::fs::write(f.dir.path().join("service.log"), "a\nb\nc\n").unwrap();
        let resp = send(
            &f.dispatcher,
            ServiceRequest::new("getrecentlogs").with_param("limit", 2),
        )
        .await;
        assert_eq!(resp.value.unwrap()["lines"], json!(["b", "c"]));
    }

    /// Clock that moves ten minutes forward on every reading.
    struct TickingClock(std::sync::Mutex<chrono::DateTime<Utc>>);

    impl Clock for TickingClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            let mut now = self.0.lock().unwrap();
            *now += Duration::minutes(10);
            *now
        }
    }

    #[tokio::test]
    async fn window_closing_during_vault_access_withholds_secret() {
        let dir = tempfile::tempdir().unwrap();
        let vault = GenesisVault::new(
            VaultConfig::new(dir.path().join("data")),
            Box::new(EphemeralProtector::new().unwrap()),
        )
        .unwrap();
        let clock = Arc::new(TickingClock(std::sync::Mutex::new(Utc::now())));
        let gate = Arc::new(GovernanceGate::new(clock));
        let dispatcher = Dispatcher::new(vault, gate.clone(), ServiceConfig::default());

        // Open at t+10 until t+25; the entry check reads t+20, the release check t+30.
        gate.unlock(Duration::minutes(15));
        let resp = send(&dispatcher, ServiceRequest::new("get_mnemonic")).await;
        assert_eq!(resp.status, Status::Locked);
        assert!(resp.value.is_none());
    }
}
