use crate::config::StoreLimits;
use crate::safe_converter::SafeCast;
use crate::segment::Segment;
use crate::seq_id::{SeqId, SeqLine};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Which of a segment's ids a store uses as keys
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Keying {
    /// one key per unit, its data id
    DataId,
    /// one key per transmission attempt - a unit's keys are always a subset of its transmission
    ///  ids
    TransmissionId,
}

/// The role-specific part of a store: what happens to a unit that is evicted
pub trait DiscardPolicy {
    fn keying(&self) -> Keying;

    /// called exactly once for every unit that is evicted. The segment is handed over by value,
    ///  and the policy has no access to the store, so it never sees a unit half removed.
    fn on_discard(&mut self, segment: Segment);
}

struct UnitEntry {
    segment: Segment,
    keys: BTreeSet<i64>,
    order_key: i64,
}

/// An index from sequence ids to units plus the reverse index from units to their ids.
///
/// Units are identified by their data id; each unit can be registered under several keys (e.g.
///  one per transmission attempt). Removing a unit always removes all its keys, and a unit that
///  loses its last key through eviction is removed and reported to the [DiscardPolicy].
///
/// Keys and units are ordered along a linear projection of the id ring (see [SeqLine]): keys
///  by their own position, units by their newest key.
///
/// The store is bounded by [StoreLimits], enforced by four eviction passes every time data is
///  inserted:
/// 1. while there are more units than `max_entries`, the oldest key is dropped
/// 2. keys further than `max_entry_offset` behind the newest key are dropped
/// 3. while the oldest unit was not touched for longer than `max_entry_timeout`, it is dropped
/// 4. units with more than `max_entry_occurrences` keys are dropped
pub struct WindowedStore<P: DiscardPolicy> {
    limits: StoreLimits,
    policy: P,
    key_line: SeqLine,
    by_key: BTreeMap<i64, (SeqId, SeqId)>,
    by_unit: FxHashMap<SeqId, UnitEntry>,
    unit_order: BTreeMap<i64, SeqId>,
}

impl<P: DiscardPolicy> WindowedStore<P> {
    pub fn new(limits: StoreLimits, policy: P) -> WindowedStore<P> {
        WindowedStore {
            limits,
            policy,
            key_line: SeqLine::default(),
            by_key: BTreeMap::default(),
            by_unit: FxHashMap::default(),
            unit_order: BTreeMap::default(),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    /// number of distinct units
    pub fn len(&self) -> usize {
        self.by_unit.len()
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_unit.is_empty()
    }

    pub fn insert(&mut self, key: SeqId, segment: Segment) {
        self.insert_all(&[key], segment);
    }

    /// Registers a unit under additional keys, replacing the stored segment for the unit's
    ///  data id. Keys previously held by a different unit are taken over, detaching them from
    ///  that unit.
    pub fn insert_all(&mut self, keys: &[SeqId], segment: Segment) {
        let data_id = segment.data_id();

        let mut linear_keys = Vec::with_capacity(keys.len());
        for &key in keys {
            let linear = self.key_line.project(key);
            if let Some(&(_, owner)) = self.by_key.get(&linear) {
                if owner != data_id {
                    debug!("key {:?} is reused for unit {:?} while held by unit {:?} - detaching it", key, data_id, owner);
                    self.discard_key(linear);
                }
            }
            linear_keys.push((key, linear));
        }

        let entry = self.by_unit.entry(data_id)
            .or_insert_with(|| UnitEntry {
                segment: segment.clone(),
                keys: BTreeSet::new(),
                order_key: i64::MIN,
            });
        entry.segment = segment;
        for (key, linear) in linear_keys {
            entry.keys.insert(linear);
            self.by_key.insert(linear, (key, data_id));
        }

        if self.policy.keying() == Keying::TransmissionId {
            // the segment's transmission list must not name ids the store does not hold
            let stale = entry.segment.transmission_ids()
                .filter(|id| !entry.keys.contains(&self.key_line.peek(*id)))
                .collect::<Vec<_>>();
            for id in stale {
                entry.segment.forget_transmission(id);
            }
        }

        self.reorder_unit(data_id);
        self.discard_expired();
    }

    pub fn get(&self, key: SeqId) -> Option<&Segment> {
        let data_id = self.owner_of(key)?;
        self.by_unit.get(&data_id)
            .map(|e| &e.segment)
    }

    pub fn get_unit(&self, data_id: SeqId) -> Option<&Segment> {
        self.by_unit.get(&data_id)
            .map(|e| &e.segment)
    }

    pub fn contains_key(&self, key: SeqId) -> bool {
        self.owner_of(key).is_some()
    }

    /// all keys a unit is registered under, oldest first
    pub fn keys_of(&self, data_id: SeqId) -> Vec<SeqId> {
        match self.by_unit.get(&data_id) {
            None => Vec::new(),
            Some(entry) => entry.keys.iter()
                .filter_map(|linear| self.by_key.get(linear))
                .map(|(key, _)| *key)
                .collect(),
        }
    }

    pub fn oldest_key(&self) -> Option<SeqId> {
        self.by_key.first_key_value()
            .map(|(_, (key, _))| *key)
    }

    pub fn newest_key(&self) -> Option<SeqId> {
        self.by_key.last_key_value()
            .map(|(_, (key, _))| *key)
    }

    /// the units in the store, ordered by their newest key, oldest first
    pub fn units(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.unit_order.values()
            .filter_map(|data_id| self.by_unit.get(data_id))
            .map(|e| &e.segment)
    }

    pub fn newest_unit(&self) -> Option<&Segment> {
        self.unit_order.last_key_value()
            .and_then(|(_, data_id)| self.by_unit.get(data_id))
            .map(|e| &e.segment)
    }

    /// copies of all units, ordered like [WindowedStore::units]
    pub fn snapshot(&self) -> Vec<Segment> {
        self.units()
            .cloned()
            .collect()
    }

    /// Removes the unit registered under a key, together with all its other keys. The unit is
    ///  returned rather than reported to the discard policy.
    pub fn remove_by_key(&mut self, key: SeqId) -> Option<Segment> {
        let data_id = self.owner_of(key)?;
        self.remove_unit(data_id)
    }

    /// Removes a unit with all its keys. The unit is returned rather than reported to the
    ///  discard policy.
    pub fn remove_unit(&mut self, data_id: SeqId) -> Option<Segment> {
        let entry = self.by_unit.remove(&data_id)?;
        for linear in &entry.keys {
            self.by_key.remove(linear);
        }
        self.unit_order.remove(&entry.order_key);
        Some(entry.segment)
    }

    /// Runs all eviction passes with the current time.
    pub fn discard_expired(&mut self) {
        let now = Instant::now();

        while self.by_unit.len() > self.limits.max_entries {
            match self.by_key.first_key_value() {
                Some((&linear, _)) => self.discard_key(linear),
                None => break,
            }
        }

        if let Some((&newest, _)) = self.by_key.last_key_value() {
            let max_offset: i64 = self.limits.max_entry_offset.safe_cast();
            let too_old = self.by_key
                .range(..newest - max_offset)
                .map(|(linear, _)| *linear)
                .collect::<Vec<_>>();
            for linear in too_old {
                self.discard_key(linear);
            }
        }

        if let Some(timeout) = self.limits.max_entry_timeout {
            while let Some((_, data_id)) = self.unit_order.first_key_value() {
                let data_id = *data_id;
                let is_expired = self.by_unit.get(&data_id)
                    .map(|e| e.segment.age(now) > timeout)
                    .unwrap_or(false);
                if !is_expired {
                    break;
                }
                trace!("unit {:?} timed out", data_id);
                self.evict_unit(data_id);
            }
        }

        let over_used = self.by_unit.iter()
            .filter(|(_, e)| e.keys.len() > self.limits.max_entry_occurrences)
            .map(|(data_id, e)| (e.order_key, *data_id))
            .collect::<BTreeMap<_, _>>();
        for data_id in over_used.into_values() {
            trace!("unit {:?} exceeds the maximum number of occurrences", data_id);
            self.evict_unit(data_id);
        }
    }

    fn owner_of(&self, key: SeqId) -> Option<SeqId> {
        self.by_key.get(&self.key_line.peek(key))
            .filter(|(stored_key, _)| *stored_key == key)
            .map(|(_, data_id)| *data_id)
    }

    fn discard_key(&mut self, linear: i64) {
        let Some((key, data_id)) = self.by_key.remove(&linear) else {
            return;
        };
        let keying = self.policy.keying();
        if let Some(entry) = self.by_unit.get_mut(&data_id) {
            entry.keys.remove(&linear);
            if keying == Keying::TransmissionId {
                entry.segment.forget_transmission(key);
            }
        }
        self.reorder_unit(data_id);
    }

    fn evict_unit(&mut self, data_id: SeqId) {
        if let Some(segment) = self.remove_unit(data_id) {
            self.policy.on_discard(segment);
        }
    }

    /// re-positions a unit after its key set changed, evicting it if it has no keys left
    fn reorder_unit(&mut self, data_id: SeqId) {
        let Some(entry) = self.by_unit.get_mut(&data_id) else {
            return;
        };
        self.unit_order.remove(&entry.order_key);

        match entry.keys.last().copied() {
            Some(newest) => {
                entry.order_key = newest;
                self.unit_order.insert(newest, data_id);
            }
            None => {
                if let Some(entry) = self.by_unit.remove(&data_id) {
                    self.policy.on_discard(entry.segment);
                }
            }
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let mut num_keys = 0;
        for (data_id, entry) in &self.by_unit {
            assert_eq!(entry.segment.data_id(), *data_id);
            assert!(!entry.keys.is_empty());
            assert_eq!(self.unit_order.get(&entry.order_key), Some(data_id));
            assert_eq!(entry.keys.last(), Some(&entry.order_key));
            for linear in &entry.keys {
                let (key, owner) = self.by_key.get(linear).unwrap();
                assert_eq!(owner, data_id);
                assert_eq!(self.key_line.peek(*key), *linear);
                if self.policy.keying() == Keying::TransmissionId {
                    assert!(entry.segment.transmission_ids().any(|id| id == *key));
                }
            }
            if self.policy.keying() == Keying::TransmissionId {
                assert_eq!(entry.segment.transmission_count(), entry.keys.len());
            }
            num_keys += entry.keys.len();
        }
        assert_eq!(self.by_key.len(), num_keys);
        assert_eq!(self.unit_order.len(), self.by_unit.len());
    }
}

/// Discard policy of the sent store: a unit evicted from it will never be acknowledged, so it
///  is collected for reporting as 'unacked'
#[derive(Default)]
pub struct SentDiscardPolicy {
    unacked: Vec<Segment>,
}

impl SentDiscardPolicy {
    pub fn take_unacked(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.unacked)
    }
}

impl DiscardPolicy for SentDiscardPolicy {
    fn keying(&self) -> Keying {
        Keying::TransmissionId
    }

    fn on_discard(&mut self, segment: Segment) {
        debug!("giving up on unit {:?} after {} transmissions", segment.data_id(), segment.transmission_count());
        self.unacked.push(segment);
    }
}

/// Discard policy of the acked store: it only keeps a recent history of acknowledged units,
///  so evicted units are simply forgotten
#[derive(Default)]
pub struct AckedDiscardPolicy {}

impl DiscardPolicy for AckedDiscardPolicy {
    fn keying(&self) -> Keying {
        Keying::TransmissionId
    }

    fn on_discard(&mut self, segment: Segment) {
        trace!("dropping acked unit {:?} from history", segment.data_id());
    }
}
