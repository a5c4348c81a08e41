//! The top-level engine: owns the PCB pool, listener and connection pools,
//! and dispatches the four event sources of §2 (inbound segment, timer
//! expiry, PMTU change, application call) into the input/output engines.

use std::collections::{HashMap, VecDeque};

use crate::config::EngineConfig;
use crate::connection::{ConnectionHandler, ConnectionSlot};
use crate::error::{Result, TcpError};
use crate::listener::{ListenerHandler, ListenerSlot};
use crate::pcb::{FourTuple, Pcb};
use crate::phy::IpSender;
use crate::rand::Rand;
use crate::wire::IpAddress;

/// The TCP protocol engine (§1). `OOS` is the out-of-sequence hole capacity
/// shared by every PCB (`N < 16`, §4.2); `S` is the egress collaborator
/// (§6) the host wires up to its IPv4/routing layer.
pub struct TcpEngine<const OOS: usize, S: IpSender> {
    pub(crate) pcbs: Vec<Pcb<OOS>>,
    pub(crate) unreferenced: VecDeque<usize>,
    pub(crate) active_index: HashMap<FourTuple, usize>,
    pub(crate) time_wait_index: HashMap<FourTuple, usize>,

    pub(crate) listeners: Vec<Option<ListenerSlot>>,
    pub(crate) connections: Vec<Option<ConnectionSlot>>,

    pub(crate) sender: S,
    pub(crate) rand: Rand,
    pub(crate) ephemeral_cursor: u16,
    pub(crate) config: EngineConfig,

    /// The single local interface address this engine answers on. Choosing
    /// a source address for a route is an IP-forwarding concern and
    /// therefore out of scope (§1); a small embedded stack binds one
    /// interface address for its lifetime.
    pub(crate) local_addr: IpAddress,
}

impl<const OOS: usize, S: IpSender> TcpEngine<OOS, S> {
    /// Build an engine with a fixed-capacity PCB pool, listener table and
    /// connection pool, all pre-allocated here and never resized (§4.3,
    /// §12).
    pub fn new(
        local_addr: IpAddress,
        pcb_capacity: usize,
        listener_capacity: usize,
        connection_capacity: usize,
        sender: S,
        config: EngineConfig,
    ) -> TcpEngine<OOS, S> {
        assert!(OOS > 0 && OOS < 16, "OOS hole capacity must be in 1..16");
        let (pcbs, unreferenced) = crate::pool::fresh_pool(pcb_capacity);
        let (active_index, time_wait_index) = crate::pool::fresh_index_maps();
        TcpEngine {
            pcbs,
            unreferenced,
            active_index,
            time_wait_index,
            listeners: (0..listener_capacity).map(|_| None).collect(),
            connections: (0..connection_capacity).map(|_| None).collect(),
            sender,
            rand: Rand::new(config.rand_seed),
            ephemeral_cursor: crate::config::EPHEMERAL_PORT_FIRST,
            config,
            local_addr,
        }
    }

    pub fn local_addr(&self) -> IpAddress {
        self.local_addr
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut S {
        &mut self.sender
    }

    pub(crate) fn connection_slot(&self, handle: crate::connection::ConnectionHandle) -> &ConnectionSlot {
        self.connections[handle.0]
            .as_ref()
            .expect("stale ConnectionHandle")
    }

    pub(crate) fn connection_slot_mut(
        &mut self,
        handle: crate::connection::ConnectionHandle,
    ) -> &mut ConnectionSlot {
        self.connections[handle.0]
            .as_mut()
            .expect("stale ConnectionHandle")
    }

    /// Register a not-yet-connected Connection slot and return its handle.
    /// The slot starts in `ConnState::Init`; it becomes `Connected` once
    /// `start_connection`/`accept_connection` attaches a PCB.
    pub fn new_connection(
        &mut self,
        recv_capacity: usize,
        send_capacity: usize,
        handler: Box<dyn ConnectionHandler>,
    ) -> Result<crate::connection::ConnectionHandle> {
        let idx = self
            .next_connection_slot()
            .ok_or(TcpError::NoPcbAvail)?;
        self.connections[idx] = Some(ConnectionSlot::new(
            recv_capacity,
            send_capacity,
            handler,
            self.config.default_wnd_ann_threshold,
        ));
        Ok(crate::connection::ConnectionHandle(idx))
    }

    pub fn register_listener(
        &mut self,
        addr: Option<IpAddress>,
        port: u16,
        max_pcbs: usize,
        initial_rcv_wnd: u32,
        handler: Box<dyn ListenerHandler>,
    ) -> Result<crate::listener::ListenerHandle> {
        let conflict = self
            .listeners
            .iter()
            .flatten()
            .any(|l| l.addr == addr && l.port == port);
        if conflict {
            return Err(TcpError::AddrInUse);
        }
        let idx = self.next_listener_slot().ok_or(TcpError::NoPcbAvail)?;
        self.listeners[idx] = Some(ListenerSlot {
            addr,
            port,
            max_pcbs,
            num_pcbs: 0,
            initial_rcv_wnd,
            accept_pcb: None,
            handler,
        });
        Ok(crate::listener::ListenerHandle(idx))
    }

    pub fn release_listener(&mut self, handle: crate::listener::ListenerHandle) {
        self.listeners[handle.0] = None;
    }

    /// Every live connection slot's handle, in pool order. A passively
    /// accepted connection never hands its [`crate::connection::ConnectionHandle`]
    /// to application code any other way (the `ConnectionHandler` callbacks
    /// carry no handle of their own, by design — see [`crate::listener`]), so
    /// this is how a host finds the handle for a connection it just accepted.
    pub fn connection_handles(&self) -> impl Iterator<Item = crate::connection::ConnectionHandle> + '_ {
        self.connections
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| crate::connection::ConnectionHandle(i)))
    }
}
