//! Wire-level command multiplexing.
//!
//! Every logical inbound message starts with a one-byte command identifier;
//! data and control share the same message channel. When the transport
//! fragments a message, only the first fragment carries the command byte, so
//! the multiplexer caches it per client and logically prepends it to every
//! later fragment. Byte-stream commands are dispatched fragment by fragment
//! (their concatenation is identical to the unfragmented payload); the
//! configuration command is reassembled in a bounded stash because JSON
//! cannot be parsed incrementally.

use super::clients::ClientId;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Client → bridge: bytes for the UART.
pub const CMD_INPUT: u8 = b'0';
/// Client → bridge: terminal resize. Accepted and ignored; the bridge has no
/// line discipline.
pub const CMD_RESIZE: u8 = b'1';
/// Client → bridge: configuration change. The command byte doubles as the
/// opening brace of the JSON document.
pub const CMD_STTY: u8 = b'{';
/// Bridge → client: UART output.
pub const CMD_OUTPUT: u8 = b'0';

/// Upper bound on a reassembled control payload. Oversized payloads are
/// truncated and will fail JSON validation downstream.
const CONTROL_STASH_MAX: usize = 512;

/// A decoded inbound unit ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A fragment of a byte-stream command, dispatched as it arrives.
    Stream {
        command: u8,
        payload: Vec<u8>,
        fin: bool,
    },
    /// A fully reassembled control command.
    Control { command: u8, payload: Vec<u8> },
}

#[derive(Debug)]
struct PendingFragment {
    command: u8,
    received: u64,
    stash: Vec<u8>,
    truncated: bool,
}

/// Per-client fragment reassembly state.
#[derive(Debug, Default)]
pub struct CommandMultiplexer {
    pending: HashMap<ClientId, PendingFragment>,
}

impl CommandMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport fragment.
    ///
    /// `fragment_index` is the byte offset of this fragment within the
    /// logical message, `total_len` the declared length of the whole
    /// message. Returns the decoded unit to dispatch, or `None` when the
    /// fragment only advanced reassembly state.
    pub fn ingest(
        &mut self,
        id: ClientId,
        bytes: &[u8],
        fragment_index: u64,
        fragment_len: usize,
        total_len: u64,
    ) -> Option<Inbound> {
        let bytes = &bytes[..fragment_len.min(bytes.len())];

        if fragment_index == 0 {
            let (&command, payload) = bytes.split_first()?;

            if bytes.len() as u64 >= total_len {
                // Entire message in one fragment.
                self.pending.remove(&id);
                return Some(if command == CMD_STTY {
                    Inbound::Control {
                        command,
                        payload: payload.to_vec(),
                    }
                } else {
                    Inbound::Stream {
                        command,
                        payload: payload.to_vec(),
                        fin: true,
                    }
                });
            }

            // First fragment of a longer sequence: cache the command byte.
            debug!(client = id, command, total_len, "caching fragmented command");
            let stash = if command == CMD_STTY {
                payload.to_vec()
            } else {
                Vec::new()
            };
            self.pending.insert(
                id,
                PendingFragment {
                    command,
                    received: bytes.len() as u64,
                    stash,
                    truncated: false,
                },
            );
            if command == CMD_STTY {
                return None;
            }
            return Some(Inbound::Stream {
                command,
                payload: payload.to_vec(),
                fin: false,
            });
        }

        // Continuation fragment: the command byte comes from the cache.
        let Some(pending) = self.pending.get_mut(&id) else {
            warn!(client = id, fragment_index, "continuation without cached command, dropped");
            return None;
        };

        pending.received += bytes.len() as u64;
        let fin = pending.received >= total_len;
        let command = pending.command;

        if command == CMD_STTY {
            let room = CONTROL_STASH_MAX.saturating_sub(pending.stash.len());
            if bytes.len() > room {
                pending.truncated = true;
            }
            pending.stash.extend_from_slice(&bytes[..bytes.len().min(room)]);
            if !fin {
                return None;
            }
            let pending = self.pending.remove(&id)?;
            if pending.truncated {
                warn!(client = id, "control payload exceeded stash limit, truncated");
            }
            return Some(Inbound::Control {
                command,
                payload: pending.stash,
            });
        }

        if fin {
            self.pending.remove(&id);
        }
        Some(Inbound::Stream {
            command,
            payload: bytes.to_vec(),
            fin,
        })
    }

    /// Discard a client's reassembly state (disconnect path).
    pub fn forget(&mut self, id: ClientId) {
        self.pending.remove(&id);
    }

    /// The command byte currently cached for a client, if any.
    pub fn pending_command(&self, id: ClientId) -> Option<u8> {
        self.pending.get(&id).map(|p| p.command)
    }
}
