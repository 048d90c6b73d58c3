//! The UNIX-domain-socket IPC server DLMs connect to. One task per
//! connection; each applies incoming messages to the shared [`DlmRegistry`]
//! and republishes link-level changes on a broadcast channel for C7 to
//! fan out as MSCR/MNTR pushes.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use magic_common::model::LinkDynamicState;

use crate::ipc::{frame, IpcHeader, MessageType, MsgHeartbeat, MsgLinkEvent, MsgRegister, MsgRegisterAck};
use crate::registry::DlmRegistry;

/// A change the registry wants broadcast to interested subscribers (C7's
/// status fan-out).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    LinkRegistered { link_id: String },
    LinkStateChanged { link_id: String },
    LinkDown { link_id: String },
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Bind the listener at `socket_path`, removing a stale socket file left
/// behind by a previous crashed run.
pub async fn bind(socket_path: &Path) -> std::io::Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    UnixListener::bind(socket_path)
}

/// Accept connections forever, spawning one handler task per DLM. Returns
/// only on a listener-level I/O error (the caller decides whether to
/// restart).
pub async fn serve(
    listener: UnixListener,
    registry: Arc<DlmRegistry>,
    events: broadcast::Sender<RegistryEvent>,
) -> std::io::Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let registry = Arc::clone(&registry);
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, registry, events).await {
                tracing::warn!(error = %err, "DLM IPC connection closed with error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    registry: Arc<DlmRegistry>,
    events: broadcast::Sender<RegistryEvent>,
) -> anyhow::Result<()> {
    let mut sequence = 0u32;
    let mut registered_dlm_id: Option<String> = None;

    loop {
        let mut header_buf = [0u8; 12];
        if stream.read_exact(&mut header_buf).await.is_err() {
            break;
        }
        let mut header_bytes = Bytes::copy_from_slice(&header_buf);
        let header = IpcHeader::decode(&mut header_bytes)?;

        let mut payload = vec![0u8; header.length as usize];
        stream.read_exact(&mut payload).await?;
        let payload = Bytes::from(payload);

        match header.msg_type {
            MessageType::Register => {
                let msg = MsgRegister::decode(payload)?;
                let assigned_id = registry.register_link(
                    &msg.dlm_id,
                    &msg.link_profile_id,
                    &msg.iface_name,
                    msg.cost_index,
                    msg.max_bw_kbps,
                    msg.typical_latency_ms,
                    msg.priority,
                    msg.coverage,
                    now_unix(),
                );
                registered_dlm_id = Some(msg.dlm_id.clone());
                tracing::info!(dlm_id = %msg.dlm_id, link = %msg.link_profile_id, assigned_id, "DLM registered");
                let _ = events.send(RegistryEvent::LinkRegistered {
                    link_id: msg.link_profile_id.clone(),
                });

                let ack = MsgRegisterAck {
                    result: 0,
                    assigned_id,
                    message: "registered".to_string(),
                };
                sequence += 1;
                let out = frame(MessageType::RegisterAck, sequence, &ack.encode());
                stream.write_all(&out).await?;
            }
            MessageType::LinkEvent => {
                let msg = MsgLinkEvent::decode(payload)?;
                let link_id = registered_dlm_id_or_lookup(&registry, &registered_dlm_id, &msg.dlm_id);
                registry.update_link_dynamic_state(
                    &msg.dlm_id,
                    LinkDynamicState {
                        is_up: msg.is_link_up,
                        current_bw_kbps: msg.current_bw_kbps,
                        current_latency_ms: msg.current_latency_ms,
                        rtt_ms: msg.current_latency_ms,
                        loss_rate: 0.0,
                        current_load_kbps: 0,
                        last_heartbeat_unix: now_unix(),
                        ip_address: msg.ip_address,
                        netmask: msg.netmask,
                    },
                )?;
                if let Some(link_id) = link_id {
                    let event = if msg.is_link_up {
                        RegistryEvent::LinkStateChanged { link_id }
                    } else {
                        RegistryEvent::LinkDown { link_id }
                    };
                    let _ = events.send(event);
                }
            }
            MessageType::Heartbeat => {
                let msg = MsgHeartbeat::decode(payload)?;
                registry.record_heartbeat(&msg.dlm_id, now_unix())?;
            }
            MessageType::Shutdown => {
                if let Some(dlm_id) = &registered_dlm_id {
                    if let Some(link_id) = registry.mark_link_down(dlm_id) {
                        let _ = events.send(RegistryEvent::LinkDown { link_id });
                    }
                }
                break;
            }
            other => {
                tracing::debug!(?other, "unhandled IPC message type on DLM connection");
            }
        }
    }

    if let Some(dlm_id) = registered_dlm_id {
        if let Some(link_id) = registry.mark_link_down(&dlm_id) {
            let _ = events.send(RegistryEvent::LinkDown { link_id });
        }
    }
    Ok(())
}

fn registered_dlm_id_or_lookup(
    registry: &DlmRegistry,
    known: &Option<String>,
    wire_dlm_id: &str,
) -> Option<String> {
    let dlm_id = known.as_deref().unwrap_or(wire_dlm_id);
    registry
        .iterate_links()
        .into_iter()
        .find(|l| l.dlm_driver_id == dlm_id)
        .map(|l| l.link_id)
}
