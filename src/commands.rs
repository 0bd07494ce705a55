//! Remote command surface over MQTT.
//!
//! The channel subscribes to a fixed set of command subjects on every
//! ConnAck (rumqttc reconnects transparently, so re-subscription rides on
//! that) and dispatches each publish synchronously. Ordering within the
//! handler is favored over throughput: a slow lifecycle call blocks the next
//! inbound message. Malformed or unrecognized messages are logged and
//! dropped, never fatal.

use crate::config::MqttConfig;
use crate::controller::ServiceController;
use crate::registry::ServiceRegistry;
use crate::remote::RegistryApi;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const CMD_CREATE_SERVICE: &str = "create_new_systemctl_service";
pub const CMD_REMOVE_SERVICE: &str = "remove_service";
pub const CMD_RESTART_ALL: &str = "restart_configs";
pub const CMD_RUN_COMMAND: &str = "run_command_for_systemd_service";
pub const CMD_UPDATE_MODULES: &str = "update_modules_list";

const COMMAND_SUBJECTS: [&str; 5] = [
    CMD_CREATE_SERVICE,
    CMD_REMOVE_SERVICE,
    CMD_RESTART_ALL,
    CMD_RUN_COMMAND,
    CMD_UPDATE_MODULES,
];

#[derive(Debug, Deserialize)]
struct ServicePayload {
    config_id: String,
}

#[derive(Debug, Deserialize)]
struct RunCommandPayload {
    config_id: String,
    action: String,
}

pub struct CommandChannel {
    controller: Arc<ServiceController>,
    registry: Arc<ServiceRegistry>,
    remote: Arc<dyn RegistryApi>,
    topic_prefix: String,
}

impl CommandChannel {
    pub fn new(
        controller: Arc<ServiceController>,
        registry: Arc<ServiceRegistry>,
        remote: Arc<dyn RegistryApi>,
        topic_prefix: String,
    ) -> Self {
        Self {
            controller,
            registry,
            remote,
            topic_prefix,
        }
    }

    /// Drive the MQTT event loop forever. Connection errors back off and
    /// retry; the dispatch logic never sees them.
    pub async fn run(self, cfg: &MqttConfig) {
        let client_id = format!("modkeeper_{}", chrono::Utc::now().timestamp());
        let mut options = MqttOptions::new(client_id, &cfg.broker, cfg.port);
        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker {}:{}", cfg.broker, cfg.port);
                    self.subscribe_commands(&client).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_message(&publish.topic, &publish.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("MQTT connection error: {}, retrying", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn subscribe_commands(&self, client: &AsyncClient) {
        for subject in COMMAND_SUBJECTS {
            let topic = format!("{}/command/{}", self.topic_prefix, subject);
            match client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                Ok(()) => tracing::info!("Subscribed to {}", topic),
                Err(e) => tracing::error!("Failed to subscribe to {}: {}", topic, e),
            }
        }
    }

    /// Dispatch one inbound command message. Public for tests; the MQTT
    /// loop is the only production caller.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let mut segments = topic.rsplit('/');
        let subject = segments.next().unwrap_or_default();
        if segments.next() != Some("command") {
            tracing::warn!("Ignoring message on unexpected topic: {}", topic);
            return;
        }

        tracing::info!("Received command '{}'", subject);
        match subject {
            CMD_CREATE_SERVICE => {
                if let Some(p) = parse_payload::<ServicePayload>(subject, payload) {
                    if let Err(e) = self.controller.create(&p.config_id).await {
                        tracing::error!("create_service for {} failed: {}", p.config_id, e);
                    }
                }
            }
            CMD_REMOVE_SERVICE => {
                if let Some(p) = parse_payload::<ServicePayload>(subject, payload) {
                    if let Err(e) = self.controller.delete(&p.config_id).await {
                        tracing::error!("remove_service for {} failed: {}", p.config_id, e);
                    }
                }
            }
            CMD_RESTART_ALL => {
                self.controller.restart_all().await;
            }
            CMD_RUN_COMMAND => {
                if let Some(p) = parse_payload::<RunCommandPayload>(subject, payload) {
                    self.run_command(&p.config_id, &p.action).await;
                }
            }
            CMD_UPDATE_MODULES => {
                self.refresh_modules().await;
            }
            other => {
                tracing::warn!("Unknown command subject: {}", other);
            }
        }
    }

    async fn run_command(&self, guid: &str, action: &str) {
        let result = match action {
            "start" => self.controller.start(guid).await,
            "stop" => self.controller.stop(guid).await,
            "restart" => self.controller.restart(guid).await,
            other => {
                tracing::error!("Unknown action '{}' for module {}", other, guid);
                return;
            }
        };
        if let Err(e) = result {
            tracing::error!("Action '{}' for module {} failed: {}", action, guid, e);
        }
    }

    /// Refresh the cached module list from the remote registry.
    pub async fn refresh_modules(&self) {
        match self.remote.list_modules().await {
            Ok(modules) => {
                tracing::info!("Module list refreshed: {} modules", modules.len());
                self.registry.replace_modules(modules).await;
            }
            Err(e) => {
                tracing::error!("Failed to refresh module list: {}", e);
            }
        }
    }
}

fn parse_payload<'a, T: Deserialize<'a>>(subject: &str, payload: &'a [u8]) -> Option<T> {
    match serde_json::from_slice(payload) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::error!("Malformed payload for command '{}': {}", subject, e);
            None
        }
    }
}
