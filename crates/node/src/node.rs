use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use glam::Vec3;

use tether::{
    NetError, NetObjectSystem, NetworkId, ReplicationEvent, RpcSystem, RpcType, RpcValue, Session,
    SessionEvent, TcpSession,
};

use crate::config::{Mode, NodeConfig};
use crate::simulation::{BEACON_TYPE, Beacon, advance_beacon, nudge_offset};

const RPC_HELLO: &str = "hello";
const RPC_NUDGE: &str = "nudge";

/// A headless peer: one session plus the replication and RPC systems riding
/// on it, pumped at a fixed tick rate.
pub struct Node {
    session: TcpSession,
    objects: NetObjectSystem,
    rpc: RpcSystem,
    config: NodeConfig,
    beacon: Rc<RefCell<Beacon>>,
    beacon_id: Option<NetworkId>,
    nudges_received: Rc<Cell<u32>>,
    nudges_sent: u32,
    tick: u32,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let mut session = TcpSession::new(config.session.clone());

        let objects = NetObjectSystem::startup(session.core_mut(), &config.replication);
        objects.register_type::<Beacon>(BEACON_TYPE);

        let beacon = Rc::new(RefCell::new(Beacon::new("beacon", Vec3::ZERO)));
        let nudges_received = Rc::new(Cell::new(0));

        let rpc = RpcSystem::startup(session.core_mut());
        rpc.register(RPC_HELLO, &[RpcType::Str], |source, args| {
            let name = args[0].as_str().unwrap_or_default();
            log::info!("Peer {} says hello as '{}'", source, name);
            name.len() as i32
        });

        let target = Rc::clone(&beacon);
        let counter = Rc::clone(&nudges_received);
        rpc.register(RPC_NUDGE, &[RpcType::Vec3], move |source, args| {
            let Some(offset) = args[0].as_vec3() else {
                return -1;
            };
            let Ok(mut beacon) = target.try_borrow_mut() else {
                return -1;
            };
            beacon.anchor += offset;
            counter.set(counter.get() + 1);
            log::debug!("Peer {} moved beacon anchor to {}", source, beacon.anchor);
            counter.get() as i32
        });

        let tick_duration = Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64);

        Self {
            session,
            objects,
            rpc,
            config,
            beacon,
            beacon_id: None,
            nudges_received,
            nudges_sent: 0,
            tick: 0,
            tick_duration,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
        }
    }

    pub fn start(&mut self) -> Result<(), NetError> {
        match self.config.mode {
            Mode::Host { port } => {
                self.session.host(port)?;
                self.beacon_id = self.objects.replicate(
                    self.session.core_mut(),
                    Rc::clone(&self.beacon),
                    BEACON_TYPE,
                )?;
            }
            Mode::Join { address } => self.session.join(address)?,
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.session.core().is_connected()
    }

    pub fn session(&self) -> &TcpSession {
        &self.session
    }

    pub fn beacon_id(&self) -> Option<NetworkId> {
        self.beacon_id
    }

    pub fn nudges_received(&self) -> u32 {
        self.nudges_received.get()
    }

    pub fn run(&mut self) -> Result<(), NetError> {
        while self.is_running() {
            self.tick_once()?;
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown();
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if let Some(id) = self.beacon_id.take() {
            if let Err(e) = self.objects.stop_replication(self.session.core_mut(), id) {
                log::warn!("Failed to stop replicating beacon: {}", e);
            }
            if let Err(e) = self.session.update() {
                log::warn!("Final update failed: {}", e);
            }
        }
        self.session.leave();
    }

    /// Pumps the network once and runs every fixed tick that is due.
    pub fn tick_once(&mut self) -> Result<(), NetError> {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        self.session.update()?;
        self.handle_session_events()?;
        self.handle_replication_events();

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick()?;
        }

        self.objects.system_step(self.session.core_mut())
    }

    fn tick(&mut self) -> Result<(), NetError> {
        self.tick = self.tick.wrapping_add(1);

        if self.session.am_i_host() {
            let dt = self.tick_duration.as_secs_f32();
            if let Ok(mut beacon) = self.beacon.try_borrow_mut() {
                advance_beacon(&mut beacon, dt);
            }
        } else if self.session.is_ready()
            && self.config.nudge_interval > 0
            && self.tick % self.config.nudge_interval == 0
        {
            let offset = nudge_offset(self.nudges_sent);
            self.nudges_sent += 1;
            let source = self.session.my_index();
            self.rpc.call_rpc(
                self.session.core_mut(),
                source,
                tether::HOST_CONNECTION_INDEX,
                RPC_NUDGE,
                &[RpcValue::Vec3(offset)],
            )?;
        }
        Ok(())
    }

    fn handle_session_events(&mut self) -> Result<(), NetError> {
        for event in self.session.drain_events() {
            match event {
                SessionEvent::PeerConnected { index, address } => {
                    log::info!("Peer {} joined from {}", index, address);
                    if self.session.am_i_host() {
                        self.objects
                            .send_existing_to(self.session.core_mut(), index)?;
                    }
                }
                SessionEvent::PeerDisconnected {
                    index,
                    address,
                    reason,
                } => {
                    log::info!("Peer {} ({}) {}", index, address, reason.as_str());
                }
                SessionEvent::Ready { index } => {
                    log::info!("Ready as peer {}", index);
                    if !self.session.am_i_host() {
                        let name = format!("node-{}", index);
                        self.rpc.call_rpc(
                            self.session.core_mut(),
                            index,
                            tether::HOST_CONNECTION_INDEX,
                            RPC_HELLO,
                            &[RpcValue::Str(name)],
                        )?;
                    }
                }
                SessionEvent::Rejected { address } => {
                    log::warn!("Rejected {}: session full", address);
                }
                SessionEvent::Left => {
                    log::info!("Session closed");
                }
            }
        }
        Ok(())
    }

    fn handle_replication_events(&mut self) {
        for event in self.objects.drain_events() {
            match event {
                ReplicationEvent::Created {
                    network_id,
                    type_id,
                } => {
                    let label = self
                        .objects
                        .object::<Beacon>(network_id)
                        .map(|beacon| beacon.borrow().label.clone())
                        .unwrap_or_default();
                    log::info!(
                        "Replica {} of type {} created ({})",
                        network_id,
                        type_id,
                        label
                    );
                }
                ReplicationEvent::Destroyed { network_id, .. } => {
                    log::info!("Replica {} destroyed", network_id);
                }
            }
        }
    }
}
