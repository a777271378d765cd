//! [`SafetyMonitor`] – per-tick contact scan.
//!
//! A contact is unsafe when it pairs an arm geometry with a protected
//! geometry, neither body is part of a hand, and the penetration depth
//! reaches the noise floor.  The first such contact ends the scan.
//!
//! Contact data is an optional capability of the simulation.  When either
//! the geometry groups or the contact list is unavailable the reading is
//! [`SafetyReading::NoData`], which the arbiter treats exactly like
//! [`SafetyReading::Clean`].

use reach_types::{Contact, CollisionGroups};

/// Penetration depth (metres) below which contacts are treated as solver
/// noise.
pub const PENETRATION_THRESHOLD: f32 = 0.002;

/// Bodies whose name contains this marker never trip the monitor.
pub const EXEMPT_BODY_MARKER: &str = "hand";

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyReading {
    /// The simulation exposes no contact information.
    NoData,
    Clean,
    /// The first qualifying contact found this tick.
    Collided(Contact),
}

impl SafetyReading {
    pub fn is_collided(&self) -> bool {
        matches!(self, SafetyReading::Collided(_))
    }
}

#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    groups: Option<CollisionGroups>,
}

impl SafetyMonitor {
    /// Monitor for the given geometry partition; `None` disables collision
    /// detection.
    pub fn new(groups: Option<CollisionGroups>) -> Self {
        Self { groups }
    }

    /// `true` when a contact list would actually be inspected.
    pub fn is_enabled(&self) -> bool {
        self.groups.is_some()
    }

    /// Classify the current contact list.  Read-only.
    pub fn scan(&self, contacts: Option<&[Contact]>) -> SafetyReading {
        let (Some(groups), Some(contacts)) = (&self.groups, contacts) else {
            return SafetyReading::NoData;
        };

        contacts
            .iter()
            .filter(|c| !c.touches_body(EXEMPT_BODY_MARKER))
            .filter(|c| groups.is_arm_vs_protected(c.geom1, c.geom2))
            .find(|c| c.penetration() >= PENETRATION_THRESHOLD)
            .map_or(SafetyReading::Clean, |c| SafetyReading::Collided(c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups() -> CollisionGroups {
        CollisionGroups {
            arm: [1, 2, 3].into_iter().collect(),
            protected: [10, 11].into_iter().collect(),
        }
    }

    fn contact(geom1: usize, geom2: usize, body1: &str, dist: f32) -> Contact {
        Contact {
            geom1,
            geom2,
            body1: Some(body1.to_string()),
            body2: Some("torso_link".to_string()),
            dist,
        }
    }

    #[test]
    fn arm_against_protected_beyond_threshold_collides() {
        let monitor = SafetyMonitor::new(Some(groups()));
        let hit = contact(2, 10, "left_elbow_link", -0.01);
        let reading = monitor.scan(Some([hit.clone()].as_slice()));
        assert_eq!(reading, SafetyReading::Collided(hit));
        assert!(reading.is_collided());
    }

    #[test]
    fn shallow_penetration_is_noise() {
        let monitor = SafetyMonitor::new(Some(groups()));
        let reading = monitor.scan(Some([contact(2, 10, "left_elbow_link", -0.001)].as_slice()));
        assert_eq!(reading, SafetyReading::Clean);
    }

    #[test]
    fn hand_contacts_are_exempt() {
        let monitor = SafetyMonitor::new(Some(groups()));
        let reading = monitor.scan(Some([contact(3, 10, "left_hand_palm_link", -0.05)].as_slice()));
        assert_eq!(reading, SafetyReading::Clean);
    }

    #[test]
    fn pairs_outside_the_groups_are_ignored() {
        let monitor = SafetyMonitor::new(Some(groups()));
        let contacts = [
            contact(1, 2, "left_shoulder_yaw_link", -0.05),
            contact(10, 11, "head_link", -0.05),
            contact(7, 10, "pelvis", -0.05),
        ];
        assert_eq!(monitor.scan(Some(contacts.as_slice())), SafetyReading::Clean);
    }

    #[test]
    fn first_qualifying_contact_wins() {
        let monitor = SafetyMonitor::new(Some(groups()));
        let first = contact(11, 1, "head_link", -0.004);
        let second = contact(2, 10, "left_elbow_link", -0.02);
        assert_eq!(
            monitor.scan(Some([first.clone(), second].as_slice())),
            SafetyReading::Collided(first)
        );
    }

    #[test]
    fn missing_capability_is_no_data() {
        let hit = [contact(2, 10, "left_elbow_link", -0.01)];
        assert_eq!(SafetyMonitor::new(None).scan(Some(hit.as_slice())), SafetyReading::NoData);
        assert_eq!(SafetyMonitor::new(Some(groups())).scan(None), SafetyReading::NoData);
        assert!(!SafetyReading::NoData.is_collided());
    }
}
