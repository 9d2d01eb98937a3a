//! Sighting store and ticket generation.
//!
//! Owned by a single task (see `run` in `lib.rs`) so the one-ticket-per-day
//! invariant never races across connections.

use std::collections::{HashMap, HashSet};

pub use crate::wire::Ticket;

#[derive(Debug, Clone)]
pub struct Plate {
    pub plate: String,
    pub road: u16,
    pub limit: u16,
    pub mile: u16,
    pub timestamp: u32,
}

#[derive(Debug, Default)]
pub struct Controller {
    /// Sightings per (road, plate), unordered; a new sighting is paired
    /// against every earlier one already on file.
    sightings: HashMap<(u16, String), Vec<(u32, u16)>>,
    /// Calendar days (`timestamp / 86400`) already ticketed for a plate.
    burned_days: HashMap<String, HashSet<u32>>,
}

impl Controller {
    /// Records a new sighting and returns any tickets it produces.
    ///
    /// At most one ticket is produced per call: the first pairing (in
    /// insertion order of prior sightings) whose day-span is not already
    /// burned wins, per spec's "MAY pair with every earlier sighting and
    /// select the first pair that yields a ticket".
    pub fn signal(&mut self, plate: Plate) -> Vec<Ticket> {
        let key = (plate.road, plate.plate.clone());
        let mut tickets = Vec::new();

        if let Some(history) = self.sightings.get(&key) {
            for &(other_t, other_m) in history {
                if other_t == plate.timestamp {
                    continue;
                }

                let ((t1, m1), (t2, m2)) = if plate.timestamp < other_t {
                    ((plate.timestamp, plate.mile), (other_t, other_m))
                } else {
                    ((other_t, other_m), (plate.timestamp, plate.mile))
                };

                let distance = f64::from(m2.abs_diff(m1));
                let hours = f64::from(t2 - t1) / 3600.0;
                let speed_mph = distance / hours;

                if speed_mph <= f64::from(plate.limit) {
                    continue;
                }

                let day1 = t1 / 86400;
                let day2 = t2 / 86400;

                let burned = self.burned_days.entry(plate.plate.clone()).or_default();
                if (day1..=day2).any(|d| burned.contains(&d)) {
                    continue;
                }

                burned.extend(day1..=day2);

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let speed = (speed_mph * 100.0).round() as u16;

                tickets.push(Ticket {
                    plate: plate.plate.clone(),
                    road: plate.road,
                    mile1: m1,
                    timestamp1: t1,
                    mile2: m2,
                    timestamp2: t2,
                    speed,
                });

                break;
            }
        }

        self.sightings
            .entry(key)
            .or_default()
            .push((plate.timestamp, plate.mile));

        tickets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate(plate: &str, road: u16, limit: u16, mile: u16, timestamp: u32) -> Plate {
        Plate {
            plate: plate.to_string(),
            road,
            limit,
            mile,
            timestamp,
        }
    }

    #[test]
    fn ticket_example() {
        let mut controller = Controller::default();

        assert!(controller.signal(plate("UN1X", 123, 60, 8, 0)).is_empty());

        let tickets = controller.signal(plate("UN1X", 123, 60, 9, 45));

        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].speed, 8000);
        assert_eq!(tickets[0].mile1, 8);
        assert_eq!(tickets[0].timestamp1, 0);
        assert_eq!(tickets[0].mile2, 9);
        assert_eq!(tickets[0].timestamp2, 45);
    }

    #[test]
    fn no_ticket_under_limit() {
        let mut controller = Controller::default();
        controller.signal(plate("ABC", 1, 60, 0, 0));
        let tickets = controller.signal(plate("ABC", 1, 60, 1, 120));
        assert!(tickets.is_empty());
    }

    #[test]
    fn at_most_one_ticket_per_day() {
        let mut controller = Controller::default();

        controller.signal(plate("ABC", 1, 60, 0, 0));
        let first = controller.signal(plate("ABC", 1, 60, 100, 60));
        assert_eq!(first.len(), 1);

        // Another pair on the same day must not ticket again.
        let second = controller.signal(plate("ABC", 1, 60, 200, 120));
        assert!(second.is_empty());
    }

    #[test]
    fn out_of_order_observations() {
        let mut controller = Controller::default();

        // Later message carries the earlier timestamp.
        controller.signal(plate("XYZ", 5, 50, 10, 1000));
        let tickets = controller.signal(plate("XYZ", 5, 50, 0, 0));

        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].timestamp1, 0);
        assert_eq!(tickets[0].timestamp2, 1000);
    }
}
