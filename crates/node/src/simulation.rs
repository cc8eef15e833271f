use glam::{Quat, Vec3};

use tether::{Message, MessageError, Replicated};

pub const BEACON_TYPE: u8 = 1;

const ORBIT_RADIUS: f32 = 5.0;
const ORBIT_SPEED: f32 = 0.8;

/// Demo object the host replicates: a marker circling an anchor that
/// clients can nudge over RPC.
#[derive(Debug, Clone)]
pub struct Beacon {
    pub label: String,
    pub anchor: Vec3,
    pub position: Vec3,
    pub heading: Quat,
    phase: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconState {
    pub position: Vec3,
    pub heading: Quat,
}

impl Beacon {
    pub fn new(label: &str, anchor: Vec3) -> Self {
        Self {
            label: label.to_string(),
            anchor,
            position: anchor + Vec3::X * ORBIT_RADIUS,
            heading: Quat::IDENTITY,
            phase: 0.0,
        }
    }
}

impl Replicated for Beacon {
    type Snapshot = BeaconState;

    fn write_create(&self, message: &mut Message) -> Result<(), MessageError> {
        message.write(&self.label)?;
        message.write(&self.anchor)?;
        message.write(&self.position)
    }

    fn create_from(message: &mut Message) -> Result<Self, MessageError> {
        let label: String = message.read()?;
        let anchor: Vec3 = message.read()?;
        let mut beacon = Beacon::new(&label, anchor);
        beacon.position = message.read()?;
        Ok(beacon)
    }

    fn destroy_with(&mut self, _message: &mut Message) -> Result<(), MessageError> {
        log::info!("Beacon '{}' removed at {}", self.label, self.position);
        Ok(())
    }

    fn snapshot(&self) -> BeaconState {
        BeaconState {
            position: self.position,
            heading: self.heading,
        }
    }

    fn apply_snapshot(&mut self, snapshot: &BeaconState) {
        self.position = snapshot.position;
        self.heading = snapshot.heading;
    }

    fn write_snapshot(snapshot: &BeaconState, message: &mut Message) -> Result<(), MessageError> {
        message.write(&snapshot.position)?;
        message.write(&snapshot.heading)
    }

    fn read_snapshot(message: &mut Message) -> Result<BeaconState, MessageError> {
        Ok(BeaconState {
            position: message.read()?,
            heading: message.read()?,
        })
    }
}

pub fn advance_beacon(beacon: &mut Beacon, dt: f32) {
    beacon.phase = (beacon.phase + ORBIT_SPEED * dt) % std::f32::consts::TAU;

    let (sin, cos) = beacon.phase.sin_cos();
    beacon.position = beacon.anchor + Vec3::new(cos, 0.0, sin) * ORBIT_RADIUS;
    beacon.heading = Quat::from_rotation_y(-beacon.phase);
}

/// Offset a client sends with its n-th nudge.
pub fn nudge_offset(count: u32) -> Vec3 {
    match count % 4 {
        0 => Vec3::X,
        1 => Vec3::Z,
        2 => Vec3::NEG_X,
        _ => Vec3::NEG_Z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_orbits_its_anchor() {
        let anchor = Vec3::new(1.0, 2.0, 3.0);
        let mut beacon = Beacon::new("test", anchor);
        for _ in 0..100 {
            advance_beacon(&mut beacon, 1.0 / 60.0);
            let distance = (beacon.position - anchor).length();
            assert!((distance - ORBIT_RADIUS).abs() < 1e-3);
        }
        assert_eq!(beacon.position.y, anchor.y);
    }

    #[test]
    fn replica_matches_source() {
        let mut beacon = Beacon::new("north", Vec3::Y);
        advance_beacon(&mut beacon, 0.5);

        let mut create = Message::new(0);
        beacon.write_create(&mut create).unwrap();
        let mut replica = Beacon::create_from(&mut create).unwrap();
        assert_eq!(replica.label, "north");
        assert_eq!(replica.position, beacon.position);

        advance_beacon(&mut beacon, 0.5);
        let mut update = Message::new(0);
        Beacon::write_snapshot(&beacon.snapshot(), &mut update).unwrap();
        let state = Beacon::read_snapshot(&mut update).unwrap();
        replica.apply_snapshot(&state);
        assert_eq!(replica.snapshot(), beacon.snapshot());
    }

    #[test]
    fn nudges_cycle() {
        let total: Vec3 = (0..4).map(nudge_offset).sum();
        assert_eq!(total, Vec3::ZERO);
    }
}
