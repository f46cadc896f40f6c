use std::collections::HashMap;

use crate::radio::{CharPath, CharacteristicInfo, DescPath, ServiceInfo};
use crate::{Characteristic, Descriptor, DeviceId, Error, Props, Result, Service, Uuid};

/// Stable service key. Keys are never reused within a cache.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct ServiceKey(u32);

/// Stable characteristic key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct CharKey(u32);

/// Stable descriptor key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct DescKey(u32);

#[derive(Debug)]
pub(crate) struct ServiceNode {
    pub uuid: Uuid,
    pub primary: bool,
    /// Including service.
    pub parent: Option<ServiceKey>,
    pub chars: Option<Vec<CharKey>>,
    /// Whether `chars` came from an unfiltered discovery.
    pub chars_complete: bool,
    pub included: Option<Vec<ServiceKey>>,
}

#[derive(Debug)]
pub(crate) struct CharNode {
    pub uuid: Uuid,
    pub service: ServiceKey,
    pub props: Props,
    pub notifying: bool,
    pub value: Option<Vec<u8>>,
    pub descs: Option<Vec<DescKey>>,
}

#[derive(Debug)]
pub(crate) struct DescNode {
    pub uuid: Uuid,
    pub chr: CharKey,
    pub value: Option<Vec<u8>>,
}

/// Keys removed from the cache by a single update.
#[derive(Debug, Default)]
pub(crate) struct Removed {
    pub services: Vec<ServiceKey>,
    pub chars: Vec<CharKey>,
    pub descs: Vec<DescKey>,
}

impl Removed {
    /// Returns whether nothing was removed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.chars.is_empty() && self.descs.is_empty()
    }
}

/// Per-peripheral GATT hierarchy.
#[derive(Debug)]
pub(crate) struct Cache {
    device: DeviceId,
    next: u32,
    /// Primary and secondary services in discovery order, or `None` if service
    /// discovery has not completed since the cache was last cleared.
    roots: Option<Vec<ServiceKey>>,
    /// Whether `roots` came from an unfiltered discovery and no service was
    /// invalidated since.
    complete: bool,
    services: HashMap<ServiceKey, ServiceNode>,
    chars: HashMap<CharKey, CharNode>,
    descs: HashMap<DescKey, DescNode>,
}

impl Cache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            next: 0,
            roots: None,
            complete: false,
            services: HashMap::new(),
            chars: HashMap::new(),
            descs: HashMap::new(),
        }
    }

    /// Returns whether the cached services are the full result of an
    /// unfiltered discovery.
    #[inline]
    #[must_use]
    pub const fn services_complete(&self) -> bool {
        self.complete
    }

    /// Returns whether the cached characteristics of `s` are the full result
    /// of an unfiltered discovery.
    #[inline]
    #[must_use]
    pub fn chars_complete(&self, s: ServiceKey) -> bool {
        self.services.get(&s).map_or(false, |n| n.chars_complete)
    }

    /// Removes all entries, requiring rediscovery.
    pub fn clear(&mut self) -> Removed {
        self.roots = None;
        self.complete = false;
        Removed {
            services: self.services.drain().map(|(k, _)| k).collect(),
            chars: self.chars.drain().map(|(k, _)| k).collect(),
            descs: self.descs.drain().map(|(k, _)| k).collect(),
        }
    }

    /// Finds a service by UUID. Top-level services take precedence over
    /// included services with the same UUID.
    pub fn service(&self, uuid: Uuid) -> Result<ServiceKey> {
        let Some(roots) = self.roots.as_ref() else {
            return Err(Error::ServicesNotDiscovered(self.device.clone()));
        };
        (roots.iter().copied())
            .find(|k| self.services[k].uuid == uuid)
            .or_else(|| {
                (self.services.iter())
                    .filter(|&(_, n)| n.uuid == uuid)
                    .map(|(&k, _)| k)
                    .min()
            })
            .ok_or(Error::ServiceNotFound(uuid))
    }

    /// Finds a characteristic of service `s`.
    pub fn characteristic(&self, s: ServiceKey, uuid: Uuid) -> Result<CharKey> {
        let svc = &self.services[&s];
        let Some(chars) = svc.chars.as_ref() else {
            return Err(Error::CharacteristicsNotDiscovered(svc.uuid));
        };
        (chars.iter().copied())
            .find(|k| self.chars[k].uuid == uuid)
            .ok_or(Error::CharacteristicNotFound(uuid))
    }

    /// Finds a descriptor of characteristic `c`.
    pub fn descriptor(&self, c: CharKey, uuid: Uuid) -> Result<DescKey> {
        let chr = &self.chars[&c];
        let Some(descs) = chr.descs.as_ref() else {
            return Err(Error::DescriptorsNotDiscovered(chr.uuid));
        };
        (descs.iter().copied())
            .find(|k| self.descs[k].uuid == uuid)
            .ok_or(Error::DescriptorNotFound(uuid))
    }

    /// Resolves a characteristic path.
    #[inline]
    pub fn resolve_char(&self, p: CharPath) -> Result<CharKey> {
        self.characteristic(self.service(p.service)?, p.characteristic)
    }

    /// Resolves a descriptor path.
    #[inline]
    pub fn resolve_desc(&self, p: DescPath) -> Result<DescKey> {
        self.descriptor(self.resolve_char(p.chr)?, p.descriptor)
    }

    #[inline]
    pub fn service_node(&self, k: ServiceKey) -> Option<&ServiceNode> {
        self.services.get(&k)
    }

    #[inline]
    pub fn char_node(&self, k: CharKey) -> Option<&CharNode> {
        self.chars.get(&k)
    }

    #[inline]
    pub fn char_node_mut(&mut self, k: CharKey) -> Option<&mut CharNode> {
        self.chars.get_mut(&k)
    }

    #[inline]
    pub fn desc_node(&self, k: DescKey) -> Option<&DescNode> {
        self.descs.get(&k)
    }

    #[inline]
    pub fn desc_node_mut(&mut self, k: DescKey) -> Option<&mut DescNode> {
        self.descs.get_mut(&k)
    }

    /// Marks all characteristics as not notifying.
    pub fn clear_notifying(&mut self) {
        for n in self.chars.values_mut() {
            n.notifying = false;
        }
    }

    /// Replaces the top-level services with a discovery result. When `filter`
    /// is non-empty, only services whose UUID appears in it are replaced.
    /// Services that are still present keep their keys and children.
    pub fn set_services(&mut self, found: &[ServiceInfo], filter: &[Uuid]) -> Removed {
        let old = self.roots.take().unwrap_or_default();
        let (keys, stale) = self.merge_services(old, found, filter, None);
        self.roots = Some(keys);
        self.complete |= filter.is_empty();
        stale
    }

    /// Replaces the included services of `s`.
    pub fn set_included(&mut self, s: ServiceKey, found: &[ServiceInfo]) -> Removed {
        let Some(old) = self.services.get_mut(&s).map(|n| n.included.take()) else {
            return Removed::default();
        };
        let (keys, stale) = self.merge_services(old.unwrap_or_default(), found, &[], Some(s));
        if let Some(n) = self.services.get_mut(&s) {
            n.included = Some(keys);
        }
        stale
    }

    fn merge_services(
        &mut self,
        mut old: Vec<ServiceKey>,
        found: &[ServiceInfo],
        filter: &[Uuid],
        parent: Option<ServiceKey>,
    ) -> (Vec<ServiceKey>, Removed) {
        let mut keys = Vec::with_capacity(found.len());
        for info in found {
            let pos = old.iter().position(|k| self.services[k].uuid == info.uuid);
            let k = if let Some(i) = pos {
                let k = old.remove(i);
                if let Some(n) = self.services.get_mut(&k) {
                    n.primary = info.primary;
                }
                k
            } else {
                let k = ServiceKey(self.alloc());
                self.services.insert(
                    k,
                    ServiceNode {
                        uuid: info.uuid,
                        primary: info.primary,
                        parent,
                        chars: None,
                        chars_complete: false,
                        included: None,
                    },
                );
                k
            };
            keys.push(k);
        }
        let mut stale = Removed::default();
        for k in old {
            if filter.is_empty() || filter.contains(&self.services[&k].uuid) {
                self.remove_service_tree(k, &mut stale);
            } else {
                keys.push(k);
            }
        }
        (keys, stale)
    }

    /// Replaces the characteristics of service `s`. When `filter` is
    /// non-empty, only characteristics whose UUID appears in it are replaced.
    pub fn set_chars(
        &mut self,
        s: ServiceKey,
        found: &[CharacteristicInfo],
        filter: &[Uuid],
    ) -> Removed {
        let Some(old) = self.services.get_mut(&s).map(|n| n.chars.take()) else {
            return Removed::default();
        };
        let mut old = old.unwrap_or_default();
        let mut keys = Vec::with_capacity(found.len());
        for info in found {
            let pos = old.iter().position(|k| self.chars[k].uuid == info.uuid);
            let k = if let Some(i) = pos {
                let k = old.remove(i);
                if let Some(n) = self.chars.get_mut(&k) {
                    n.props = info.props;
                }
                k
            } else {
                let k = CharKey(self.alloc());
                self.chars.insert(
                    k,
                    CharNode {
                        uuid: info.uuid,
                        service: s,
                        props: info.props,
                        notifying: false,
                        value: None,
                        descs: None,
                    },
                );
                k
            };
            keys.push(k);
        }
        let mut stale = Removed::default();
        for k in old {
            if filter.is_empty() || filter.contains(&self.chars[&k].uuid) {
                self.remove_char_tree(k, &mut stale);
            } else {
                keys.push(k);
            }
        }
        if let Some(n) = self.services.get_mut(&s) {
            n.chars = Some(keys);
            n.chars_complete |= filter.is_empty();
        }
        stale
    }

    /// Replaces the descriptors of characteristic `c`.
    pub fn set_descs(&mut self, c: CharKey, found: &[Uuid]) -> Removed {
        let Some(old) = self.chars.get_mut(&c).map(|n| n.descs.take()) else {
            return Removed::default();
        };
        let mut old = old.unwrap_or_default();
        let mut keys = Vec::with_capacity(found.len());
        for &uuid in found {
            let k = if let Some(i) = old.iter().position(|k| self.descs[k].uuid == uuid) {
                old.remove(i)
            } else {
                let k = DescKey(self.alloc());
                self.descs.insert(
                    k,
                    DescNode {
                        uuid,
                        chr: c,
                        value: None,
                    },
                );
                k
            };
            keys.push(k);
        }
        let mut stale = Removed::default();
        for k in old {
            self.descs.remove(&k);
            stale.descs.push(k);
        }
        if let Some(n) = self.chars.get_mut(&c) {
            n.descs = Some(keys);
        }
        stale
    }

    /// Removes every service with the specified UUID along with its subtree.
    /// The next unfiltered service discovery goes to the peripheral.
    pub fn remove_service(&mut self, uuid: Uuid) -> Removed {
        self.complete = false;
        let mut stale = Removed::default();
        let keys: Vec<ServiceKey> = (self.services.iter())
            .filter(|&(_, n)| n.uuid == uuid)
            .map(|(&k, _)| k)
            .collect();
        for k in keys {
            // An included service may already be gone with its parent
            if !self.services.contains_key(&k) {
                continue;
            }
            let parent = self.services[&k].parent;
            let list = match parent {
                Some(p) => self.services.get_mut(&p).and_then(|n| n.included.as_mut()),
                None => self.roots.as_mut(),
            };
            if let Some(list) = list {
                list.retain(|&c| c != k);
            }
            self.remove_service_tree(k, &mut stale);
        }
        stale
    }

    fn remove_service_tree(&mut self, k: ServiceKey, stale: &mut Removed) {
        let Some(n) = self.services.remove(&k) else { return };
        stale.services.push(k);
        for c in n.chars.unwrap_or_default() {
            self.remove_char_tree(c, stale);
        }
        for s in n.included.unwrap_or_default() {
            self.remove_service_tree(s, stale);
        }
    }

    fn remove_char_tree(&mut self, k: CharKey, stale: &mut Removed) {
        let Some(n) = self.chars.remove(&k) else { return };
        stale.chars.push(k);
        for d in n.descs.unwrap_or_default() {
            self.descs.remove(&d);
            stale.descs.push(d);
        }
    }

    #[inline]
    fn alloc(&mut self) -> u32 {
        self.next += 1;
        self.next
    }

    /// Returns a service snapshot.
    #[must_use]
    pub fn service_snapshot(&self, k: ServiceKey) -> Service {
        let n = &self.services[&k];
        Service {
            device: self.device.clone(),
            uuid: n.uuid,
            primary: n.primary,
            included_by: n.parent.map(|p| self.services[&p].uuid),
        }
    }

    /// Returns a characteristic snapshot.
    #[must_use]
    pub fn char_snapshot(&self, k: CharKey) -> Characteristic {
        let n = &self.chars[&k];
        Characteristic {
            device: self.device.clone(),
            service: self.services[&n.service].uuid,
            uuid: n.uuid,
            props: n.props,
            notifying: n.notifying,
            value: n.value.clone(),
        }
    }

    /// Returns a descriptor snapshot.
    #[must_use]
    pub fn desc_snapshot(&self, k: DescKey) -> Descriptor {
        let n = &self.descs[&k];
        let c = &self.chars[&n.chr];
        Descriptor {
            device: self.device.clone(),
            service: self.services[&c.service].uuid,
            characteristic: c.uuid,
            uuid: n.uuid,
            value: n.value.clone(),
        }
    }

    /// Returns all discovered services, each followed by its included
    /// services.
    pub fn services(&self) -> Result<Vec<Service>> {
        let Some(roots) = self.roots.as_ref() else {
            return Err(Error::ServicesNotDiscovered(self.device.clone()));
        };
        let mut v = Vec::with_capacity(self.services.len());
        let mut stack: Vec<ServiceKey> = roots.iter().rev().copied().collect();
        while let Some(k) = stack.pop() {
            v.push(self.service_snapshot(k));
            if let Some(inc) = self.services[&k].included.as_ref() {
                stack.extend(inc.iter().rev());
            }
        }
        Ok(v)
    }

    /// Returns the included services of `s`.
    pub fn included(&self, s: ServiceKey) -> Vec<Service> {
        (self.services[&s].included.iter().flatten())
            .map(|&k| self.service_snapshot(k))
            .collect()
    }

    /// Returns the discovered characteristics of `s`.
    pub fn chars(&self, s: ServiceKey) -> Result<Vec<Characteristic>> {
        let n = &self.services[&s];
        (n.chars.as_ref())
            .map(|v| v.iter().map(|&k| self.char_snapshot(k)).collect())
            .ok_or(Error::CharacteristicsNotDiscovered(n.uuid))
    }

    /// Returns the discovered descriptors of `c`.
    pub fn descs(&self, c: CharKey) -> Result<Vec<Descriptor>> {
        let n = &self.chars[&c];
        (n.descs.as_ref())
            .map(|v| v.iter().map(|&k| self.desc_snapshot(k)).collect())
            .ok_or(Error::DescriptorsNotDiscovered(n.uuid))
    }
}

#[cfg(test)]
mod tests {
    use gattlink_const::{Characteristic as Chr, Descriptor as Desc, Service as Svc};
    use matches::assert_matches;

    use super::*;

    fn cache() -> Cache {
        Cache::new(DeviceId::new("dev").unwrap())
    }

    fn hrs(c: &mut Cache) -> (ServiceKey, CharKey) {
        c.set_services(
            &[ServiceInfo::primary(Svc::HeartRate), ServiceInfo::primary(Svc::Battery)],
            &[],
        );
        let s = c.service(Svc::HeartRate.uuid()).unwrap();
        c.set_chars(
            s,
            &[
                CharacteristicInfo::new(Chr::HeartRateMeasurement, Props::NOTIFY),
                CharacteristicInfo::new(Chr::BodySensorLocation, Props::READ),
            ],
            &[],
        );
        let m = c.characteristic(s, Chr::HeartRateMeasurement.uuid()).unwrap();
        (s, m)
    }

    #[test]
    fn lookup_gating() {
        let mut c = cache();
        let p = CharPath::new(Svc::HeartRate, Chr::HeartRateMeasurement);
        assert_matches!(c.resolve_char(p), Err(Error::ServicesNotDiscovered(_)));
        c.set_services(&[ServiceInfo::primary(Svc::HeartRate)], &[]);
        assert_matches!(c.resolve_char(p), Err(Error::CharacteristicsNotDiscovered(_)));
        assert_matches!(
            c.service(Svc::Battery.uuid()),
            Err(Error::ServiceNotFound(u)) if u == Svc::Battery
        );
        let s = c.service(Svc::HeartRate.uuid()).unwrap();
        c.set_chars(s, &[CharacteristicInfo::new(Chr::BodySensorLocation, Props::READ)], &[]);
        assert_matches!(c.resolve_char(p), Err(Error::CharacteristicNotFound(_)));
        let k = c.resolve_char(CharPath::new(Svc::HeartRate, Chr::BodySensorLocation));
        assert_matches!(
            c.resolve_desc(CharPath::new(Svc::HeartRate, Chr::BodySensorLocation).descriptor(Desc::ClientCharacteristicConfiguration)),
            Err(Error::DescriptorsNotDiscovered(_))
        );
        let k = k.unwrap();
        c.set_descs(k, &[Desc::CharacteristicUserDescription.uuid()]);
        assert_matches!(
            c.descriptor(k, Desc::ClientCharacteristicConfiguration.uuid()),
            Err(Error::DescriptorNotFound(_))
        );
        assert!(c.descriptor(k, Desc::CharacteristicUserDescription.uuid()).is_ok());
    }

    #[test]
    fn rediscovery_keeps_keys() {
        let mut c = cache();
        let (s, m) = hrs(&mut c);
        c.char_node_mut(m).unwrap().value = Some(vec![1]);

        let stale = c.set_services(&[ServiceInfo::primary(Svc::HeartRate)], &[]);
        assert_eq!(stale.services.len(), 1);
        assert!(stale.chars.is_empty());
        assert_eq!(c.service(Svc::HeartRate.uuid()).unwrap(), s);
        assert_eq!(c.char_node(m).unwrap().value, Some(vec![1]));
        assert_matches!(c.service(Svc::Battery.uuid()), Err(Error::ServiceNotFound(_)));

        let stale = c.set_chars(s, &[CharacteristicInfo::new(Chr::HeartRateMeasurement, Props::INDICATE)], &[]);
        assert_eq!(stale.chars.len(), 1);
        assert_eq!(c.char_node(m).unwrap().props, Props::INDICATE);
    }

    #[test]
    fn filtered_discovery() {
        let mut c = cache();
        let (_, m) = hrs(&mut c);
        let bas = c.service(Svc::Battery.uuid()).unwrap();
        // Filter scope excludes HeartRate, so it survives an empty result
        let stale = c.set_services(&[], &[Svc::Battery.uuid()]);
        assert_eq!(stale.services, vec![bas]);
        assert!(c.char_node(m).is_some());
        assert_eq!(c.services().unwrap().len(), 1);
    }

    #[test]
    fn completeness() {
        let mut c = cache();
        c.set_services(&[ServiceInfo::primary(Svc::HeartRate)], &[Svc::HeartRate.uuid()]);
        assert!(!c.services_complete());
        c.set_services(
            &[ServiceInfo::primary(Svc::HeartRate), ServiceInfo::primary(Svc::Battery)],
            &[],
        );
        assert!(c.services_complete());
        c.set_services(&[ServiceInfo::primary(Svc::Battery)], &[Svc::Battery.uuid()]);
        assert!(c.services_complete());

        let s = c.service(Svc::HeartRate.uuid()).unwrap();
        let hrm = Chr::HeartRateMeasurement.uuid();
        c.set_chars(s, &[CharacteristicInfo::new(hrm, Props::NOTIFY)], &[hrm]);
        assert!(!c.chars_complete(s));
        c.set_chars(s, &[CharacteristicInfo::new(hrm, Props::NOTIFY)], &[]);
        assert!(c.chars_complete(s));

        c.remove_service(Svc::Battery.uuid());
        assert!(!c.services_complete());
        assert!(c.chars_complete(s));
        c.remove_service(Svc::HeartRate.uuid());
        assert!(!c.chars_complete(s));
    }

    #[test]
    fn remove_subtree() {
        let mut c = cache();
        let (s, m) = hrs(&mut c);
        c.set_descs(m, &[Desc::ClientCharacteristicConfiguration.uuid()]);
        c.set_included(s, &[ServiceInfo { uuid: Svc::DeviceInformation.uuid(), primary: false }]);
        assert_eq!(c.services().unwrap().len(), 3);
        assert_eq!(c.included(s).len(), 1);
        assert_eq!(
            c.services().unwrap()[1].included_by,
            Some(Svc::HeartRate.uuid())
        );

        let stale = c.remove_service(Svc::HeartRate.uuid());
        assert_eq!(stale.services.len(), 2);
        assert_eq!(stale.chars.len(), 2);
        assert_eq!(stale.descs.len(), 1);
        assert!(c.char_node(m).is_none());
        assert_matches!(c.service(Svc::HeartRate.uuid()), Err(Error::ServiceNotFound(_)));
        assert_matches!(c.service(Svc::DeviceInformation.uuid()), Err(Error::ServiceNotFound(_)));
        assert_eq!(c.services().unwrap().len(), 1);

        // New keys are never reused
        let (s2, m2) = hrs(&mut c);
        assert_ne!(s, s2);
        assert_ne!(m, m2);
    }

    #[test]
    fn clear() {
        let mut c = cache();
        hrs(&mut c);
        let stale = c.clear();
        assert_eq!(stale.services.len(), 2);
        assert!(!c.services_complete());
        assert_matches!(c.services(), Err(Error::ServicesNotDiscovered(_)));
    }

    #[test]
    fn snapshots() {
        let mut c = cache();
        let (s, m) = hrs(&mut c);
        c.char_node_mut(m).unwrap().notifying = true;
        let v = c.chars(s).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].uuid, Chr::HeartRateMeasurement);
        assert_eq!(v[0].service, Svc::HeartRate);
        assert!(v[0].notifying);
        assert_eq!(c.descs(m), Err(Error::DescriptorsNotDiscovered(Chr::HeartRateMeasurement.uuid())));
    }
}
