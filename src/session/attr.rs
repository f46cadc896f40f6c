use gattlink_const::Descriptor as Desc;

use super::*;

impl<R: Radio> Session<R> {
    /// Reads a characteristic value. Returns the characteristic with the new
    /// value.
    pub async fn read(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
    ) -> Result<Characteristic> {
        let path = CharPath::new(service, characteristic);
        let (c, p) = self.resolve_char(path, OpKind::ReadCharacteristic, Props::READ)?;
        let key = OpKey::new(OpKind::ReadCharacteristic, Target::Char(c));
        let v = (self.start(&self.0.ops.value, key, |r| r.read_characteristic(&p, path))?)
            .wait()
            .await?;
        self.update_char(c, path, |n| n.value = Some(v))
    }

    /// Writes a characteristic value. A write with response completes when the
    /// peripheral acknowledges it. A write without response completes as soon
    /// as the radio adapter accepts it, since nothing is ever acknowledged.
    pub async fn write(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
        value: &[u8],
        kind: WriteKind,
    ) -> Result<Characteristic> {
        let path = CharPath::new(service, characteristic);
        let required = match kind {
            WriteKind::WithResponse => Props::WRITE,
            WriteKind::WithoutResponse => Props::WRITE_WITHOUT_RESPONSE,
        };
        let (c, p) = self.resolve_char(path, OpKind::WriteCharacteristic, required)?;
        match kind {
            WriteKind::WithResponse => {
                let key = OpKey::new(OpKind::WriteCharacteristic, Target::Char(c));
                (self.start(&self.0.ops.unit, key, |r| {
                    r.write_characteristic(&p, path, value, kind)
                })?)
                .wait()
                .await?;
            }
            WriteKind::WithoutResponse => {
                if let Err(e) = self.0.radio.write_characteristic(&p, path, value, kind) {
                    warn!("{}: write command rejected: {e}", self.0.id);
                    return Err(e);
                }
            }
        }
        self.update_char(c, path, |n| n.value = Some(value.to_vec()))
    }

    /// Enables or disables notifications or indications. Returns the state
    /// reported by the platform. Disabling ends the characteristic's
    /// notification streams.
    pub async fn set_notify(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
        enable: bool,
    ) -> Result<bool> {
        let path = CharPath::new(service, characteristic);
        let (c, p) = self.resolve_notify(path)?;
        self.toggle_notify(c, p, path, enable).await
    }

    /// Returns a stream of characteristic values received via notifications or
    /// indications, enabling them first if necessary. The stream ends when
    /// notifications are disabled, the service is invalidated, or the
    /// peripheral disconnects.
    pub async fn monitor(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
    ) -> Result<Notifications> {
        let path = CharPath::new(service, characteristic);
        let (c, p, notifying, stream) = {
            let mut st = self.0.st.lock();
            let (c, p) = self.resolve_notify_locked(&st, path)?;
            let notifying = st.cache.char_node(c).map_or(false, |n| n.notifying);
            let stream = st.monitors.entry(c).or_default().subscribe(None);
            (c, p, notifying, stream)
        };
        if !notifying {
            self.toggle_notify(c, p, path, true).await?;
        }
        Ok(stream)
    }

    /// Reads a descriptor value.
    pub async fn read_descriptor(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
        descriptor: impl Into<Uuid>,
    ) -> Result<Descriptor> {
        let path = CharPath::new(service, characteristic).descriptor(descriptor);
        let (d, p) = self.resolve_desc(path)?;
        let key = OpKey::new(OpKind::ReadDescriptor, Target::Desc(d));
        let v = (self.start(&self.0.ops.value, key, |r| r.read_descriptor(&p, path))?)
            .wait()
            .await?;
        self.update_desc(d, path, v)
    }

    /// Writes a descriptor value. The Client Characteristic Configuration
    /// descriptor is managed through [`Self::set_notify`] and cannot be
    /// written directly.
    pub async fn write_descriptor(
        &self,
        service: impl Into<Uuid>,
        characteristic: impl Into<Uuid>,
        descriptor: impl Into<Uuid>,
        value: &[u8],
    ) -> Result<Descriptor> {
        let path = CharPath::new(service, characteristic).descriptor(descriptor);
        if path.descriptor == Desc::ClientCharacteristicConfiguration {
            return Err(Error::DescriptorWriteNotAllowed(path.descriptor));
        }
        let (d, p) = self.resolve_desc(path)?;
        let key = OpKey::new(OpKind::WriteDescriptor, Target::Desc(d));
        (self.start(&self.0.ops.unit, key, |r| r.write_descriptor(&p, path, value))?)
            .wait()
            .await?;
        self.update_desc(d, path, value.to_vec())
    }

    async fn toggle_notify(
        &self,
        c: CharKey,
        p: R::Peripheral,
        path: CharPath,
        enable: bool,
    ) -> Result<bool> {
        let key = OpKey::new(OpKind::SetNotify, Target::Char(c));
        (self.start(&self.0.ops.notify, key, |r| r.set_notify(&p, path, enable))?)
            .wait()
            .await
    }

    /// Resolves a characteristic of a connected peripheral and checks that
    /// its properties allow `op`.
    fn resolve_char(
        &self,
        path: CharPath,
        op: OpKind,
        required: Props,
    ) -> Result<(CharKey, R::Peripheral)> {
        let st = self.0.st.lock();
        let p = self.ready_locked(&st)?;
        let c = st.cache.resolve_char(path)?;
        if !(st.cache.char_node(c)).map_or(false, |n| n.props.intersects(required)) {
            return Err(Error::NotPermitted {
                op,
                uuid: path.characteristic,
            });
        }
        Ok((c, p))
    }

    fn resolve_notify(&self, path: CharPath) -> Result<(CharKey, R::Peripheral)> {
        let st = self.0.st.lock();
        self.resolve_notify_locked(&st, path)
    }

    fn resolve_notify_locked(
        &self,
        st: &State<R::Peripheral>,
        path: CharPath,
    ) -> Result<(CharKey, R::Peripheral)> {
        let p = self.ready_locked(st)?;
        let c = st.cache.resolve_char(path)?;
        if !(st.cache.char_node(c)).map_or(false, |n| n.props.can_notify()) {
            return Err(Error::NotPermitted {
                op: OpKind::SetNotify,
                uuid: path.characteristic,
            });
        }
        Ok((c, p))
    }

    fn resolve_desc(&self, path: DescPath) -> Result<(DescKey, R::Peripheral)> {
        let st = self.0.st.lock();
        let p = self.ready_locked(&st)?;
        Ok((st.cache.resolve_desc(path)?, p))
    }

    /// Applies `f` to a characteristic that may have been removed while the
    /// operation was in flight and returns its snapshot.
    fn update_char(
        &self,
        c: CharKey,
        path: CharPath,
        f: impl FnOnce(&mut CharNode),
    ) -> Result<Characteristic> {
        let mut st = self.0.st.lock();
        let n = (st.cache.char_node_mut(c)).ok_or(Error::ServiceInvalidated(path.service))?;
        f(n);
        Ok(st.cache.char_snapshot(c))
    }

    fn update_desc(&self, d: DescKey, path: DescPath, v: Vec<u8>) -> Result<Descriptor> {
        let mut st = self.0.st.lock();
        let n = (st.cache.desc_node_mut(d)).ok_or(Error::ServiceInvalidated(path.chr.service))?;
        n.value = Some(v);
        Ok(st.cache.desc_snapshot(d))
    }
}
