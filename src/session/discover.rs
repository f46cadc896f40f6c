use super::*;

impl<R: Radio> Session<R> {
    /// Discovers services. With a non-empty `filter`, only the listed services
    /// are requested. Serves the cached result without radio I/O if every
    /// filtered service is known or, without a filter, if an earlier unfiltered
    /// discovery completed and no service was invalidated since.
    pub async fn discover_services(&self, filter: &[Uuid]) -> Result<Vec<Service>> {
        let p = {
            let st = self.0.st.lock();
            let p = self.ready_locked(&st)?;
            let cached = if filter.is_empty() {
                st.cache.services_complete()
            } else {
                filter.iter().all(|&u| st.cache.service(u).is_ok())
            };
            if cached {
                return st.cache.services();
            }
            p
        };
        let key = OpKey::device(OpKind::DiscoverServices);
        let found = (self.start(&self.0.ops.services, key, |r| r.discover_services(&p, filter))?)
            .wait()
            .await?;
        let (r, stale) = {
            let mut st = self.0.st.lock();
            let stale = st.cache.set_services(&found, filter);
            st.drop_monitors(&stale);
            (st.cache.services(), stale)
        };
        self.sweep(&stale, |_| Error::OperationCancelled);
        r
    }

    /// Discovers the services included by `service`.
    pub async fn discover_included_services(&self, service: impl Into<Uuid>) -> Result<Vec<Service>> {
        let uuid = service.into();
        let (s, p) = {
            let st = self.0.st.lock();
            let p = self.ready_locked(&st)?;
            let s = st.cache.service(uuid)?;
            if (st.cache.service_node(s)).map_or(false, |n| n.included.is_some()) {
                return Ok(st.cache.included(s));
            }
            (s, p)
        };
        let key = OpKey::new(OpKind::DiscoverIncludedServices, Target::Service(s));
        let found = (self.start(&self.0.ops.services, key, |r| {
            r.discover_included_services(&p, uuid)
        })?)
        .wait()
        .await?;
        let (r, stale) = {
            let mut st = self.0.st.lock();
            if st.cache.service_node(s).is_none() {
                return Err(Error::ServiceInvalidated(uuid));
            }
            let stale = st.cache.set_included(s, &found);
            st.drop_monitors(&stale);
            (st.cache.included(s), stale)
        };
        self.sweep(&stale, |_| Error::OperationCancelled);
        Ok(r)
    }

    /// Discovers the characteristics of `service`. The result is served from
    /// the cache if every filtered characteristic is known or, without a
    /// filter, if an earlier unfiltered discovery completed.
    pub async fn discover_characteristics(
        &self,
        service: impl Into<Uuid>,
        filter: &[Uuid],
    ) -> Result<Vec<Characteristic>> {
        let uuid = service.into();
        let (s, p) = {
            let st = self.0.st.lock();
            let p = self.ready_locked(&st)?;
            let s = st.cache.service(uuid)?;
            let cached = if filter.is_empty() {
                st.cache.chars_complete(s)
            } else {
                filter.iter().all(|&c| st.cache.characteristic(s, c).is_ok())
            };
            if cached {
                if let Ok(v) = st.cache.chars(s) {
                    return Ok(v);
                }
            }
            (s, p)
        };
        let key = OpKey::new(OpKind::DiscoverCharacteristics, Target::Service(s));
        let found = (self.start(&self.0.ops.chars, key, |r| {
            r.discover_characteristics(&p, uuid, filter)
        })?)
        .wait()
        .await?;
        let (r, stale) = {
            let mut st = self.0.st.lock();
            if st.cache.service_node(s).is_none() {
                return Err(Error::ServiceInvalidated(uuid));
            }
            let stale = st.cache.set_chars(s, &found, filter);
            st.drop_monitors(&stale);
            (st.cache.chars(s), stale)
        };
        self.sweep(&stale, |_| Error::OperationCancelled);
        r
    }

    /// Discovers the descriptors of a characteristic, serving the cached
    /// result if they were already discovered.
    pub async fn discover_descriptors(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
    ) -> Result<Vec<Descriptor>> {
        let path = CharPath::new(service, characteristic);
        let (c, p) = {
            let st = self.0.st.lock();
            let p = self.ready_locked(&st)?;
            let c = st.cache.resolve_char(path)?;
            if let Ok(v) = st.cache.descs(c) {
                return Ok(v);
            }
            (c, p)
        };
        let key = OpKey::new(OpKind::DiscoverDescriptors, Target::Char(c));
        let found = (self.start(&self.0.ops.descs, key, |r| r.discover_descriptors(&p, path))?)
            .wait()
            .await?;
        let (r, stale) = {
            let mut st = self.0.st.lock();
            if st.cache.char_node(c).is_none() {
                return Err(Error::ServiceInvalidated(path.service));
            }
            let stale = st.cache.set_descs(c, &found);
            (st.cache.descs(c), stale)
        };
        self.sweep(&stale, |_| Error::OperationCancelled);
        r
    }

    /// Discovers all services and the characteristics of each one.
    pub async fn discover_all(&self) -> Result<Vec<Characteristic>> {
        let services = self.discover_services(&[]).await?;
        let mut all = Vec::new();
        for s in services.into_iter().filter(|s| s.included_by.is_none()) {
            all.extend(self.discover_characteristics(s.uuid, &[]).await?);
        }
        Ok(all)
    }

    /// Returns the cached services without radio I/O.
    pub fn services(&self) -> Result<Vec<Service>> {
        self.0.st.lock().cache.services()
    }

    /// Returns the cached characteristics of `service` without radio I/O.
    pub fn characteristics(&self, service: impl Into<Uuid>) -> Result<Vec<Characteristic>> {
        let st = self.0.st.lock();
        st.cache.chars(st.cache.service(service.into())?)
    }

    /// Returns a cached characteristic without radio I/O.
    pub fn characteristic(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
    ) -> Result<Characteristic> {
        let st = self.0.st.lock();
        let c = st.cache.resolve_char(CharPath::new(service, characteristic))?;
        Ok(st.cache.char_snapshot(c))
    }

    /// Returns the cached descriptors of a characteristic without radio I/O.
    pub fn descriptors(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
    ) -> Result<Vec<Descriptor>> {
        let st = self.0.st.lock();
        st.cache.descs(st.cache.resolve_char(CharPath::new(service, characteristic))?)
    }
}
