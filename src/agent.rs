use std::fmt;

use log::{debug, error, info};
use parking_lot::Mutex;

use crate::{
    config::AgentConfig,
    desc::{BlobDesc, Desc, RegDescList, XferDescList},
    error::{Result, XferError},
    mem::{HostPinner, MemType, MemoryPinner},
    registry::MemRegistry,
};

/// Builds transfer descriptor lists from raw descriptor tuples.
pub trait DescBuilder {
    /// Builds an `XferDescList` holding one descriptor per input item.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be built.
    fn get_xfer_descs<I>(
        &self,
        descs: I,
        mem_type: MemType,
        sorted: bool,
    ) -> Result<XferDescList>
    where
        I: IntoIterator,
        I::Item: Into<Desc>;
}

/// A named participant that builds descriptor lists and owns registered memory.
pub struct Agent {
    name: String,
    config: AgentConfig,
    pinner: Box<dyn MemoryPinner>,
    registry: Mutex<MemRegistry>,
}

impl Agent {
    /// Creates an agent, `None` selects the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `name` is empty.
    pub fn new(name: &str, config: Option<AgentConfig>) -> Result<Self> {
        Self::with_pinner(name, config, Box::new(HostPinner::new()))
    }

    /// Creates an agent that pins registered host memory with `pinner`.
    ///
    /// `pinner` is only used when the configuration enables `pin_dram`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `name` is empty.
    pub fn with_pinner(
        name: &str,
        config: Option<AgentConfig>,
        pinner: Box<dyn MemoryPinner>,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(XferError::InvalidInput("agent name is empty".into()));
        }
        let config = config.unwrap_or_default();
        info!("create agent {name}, config: {config:?}");

        Ok(Self {
            name: name.to_owned(),
            registry: Mutex::new(MemRegistry::new(config.max_registrations())),
            config,
            pinner,
        })
    }

    /// Name of the agent
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the agent was created with
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Builds a registration list from `descs`.
    ///
    /// # Errors
    ///
    /// Building a host-side list does not fail today.
    pub fn get_reg_descs<I>(
        &self,
        descs: I,
        mem_type: MemType,
        sorted: bool,
    ) -> Result<RegDescList>
    where
        I: IntoIterator,
        I::Item: Into<BlobDesc>,
    {
        let list = RegDescList::from_descs(mem_type, sorted, descs);
        debug!(
            "agent {} built {} {mem_type} registration descs",
            self.name,
            list.desc_count()
        );
        Ok(list)
    }

    /// Registers every entry of `descs`, returning one key per entry.
    ///
    /// Either every entry is registered or none is.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` - an entry is empty, overflows or is already registered
    /// * `ResourceExhausted` - no registration key available
    /// * `MemoryError` - host pages could not be pinned
    pub fn register_mem(&self, descs: &RegDescList) -> Result<Vec<u32>> {
        let mem_type = descs.mem_type();
        let mut registry = self.registry.lock();
        let mut keys = Vec::with_capacity(descs.desc_count());
        for blob in descs {
            let desc = blob.desc;
            let result = registry
                .check_insert(mem_type, &desc)
                .and_then(|()| self.pin(mem_type, &desc))
                .and_then(|()| {
                    registry.insert(mem_type, desc).inspect_err(|_err| {
                        self.unpin(mem_type, &desc);
                    })
                });
            match result {
                Ok(key) => keys.push(key),
                Err(err) => {
                    error!("agent {} failed to register {desc:?}: {err}", self.name);
                    for done in descs.iter().take(keys.len()) {
                        if registry.remove(mem_type, &done.desc).is_ok() {
                            self.unpin(mem_type, &done.desc);
                        }
                    }
                    return Err(err);
                }
            }
        }
        debug!(
            "agent {} registered {} {mem_type} regions",
            self.name,
            keys.len()
        );

        Ok(keys)
    }

    /// Deregisters every entry of `descs`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for the first entry that is not registered; entries
    /// before it stay deregistered.
    pub fn deregister_mem(&self, descs: &RegDescList) -> Result<()> {
        let mem_type = descs.mem_type();
        let mut registry = self.registry.lock();
        for blob in descs {
            let _key = registry.remove(mem_type, &blob.desc)?;
            self.unpin(mem_type, &blob.desc);
        }
        debug!(
            "agent {} deregistered {} {mem_type} regions",
            self.name,
            descs.desc_count()
        );

        Ok(())
    }

    /// Checks that every descriptor lies inside one registered region.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` for the first descriptor not covered.
    pub fn check_registered(&self, descs: &XferDescList) -> Result<()> {
        let mem_type = descs.mem_type();
        let registry = self.registry.lock();
        match descs
            .iter()
            .find(|desc| registry.find_covering(mem_type, desc).is_none())
        {
            Some(desc) => Err(XferError::NotRegistered(format!("{mem_type} {desc:?}"))),
            None => Ok(()),
        }
    }

    /// Number of live registrations
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Whether registrations of `mem_type` pin their pages
    fn pins(&self, mem_type: MemType) -> bool {
        mem_type.is_host() && self.config.pin_dram()
    }

    fn pin(&self, mem_type: MemType, desc: &Desc) -> Result<()> {
        if !self.pins(mem_type) {
            return Ok(());
        }
        self.pinner
            .pin_pages(desc.addr, desc.len)
            .map_err(|err| XferError::MemoryError(format!("failed to pin {desc:?}: {err}")))
    }

    fn unpin(&self, mem_type: MemType, desc: &Desc) {
        if !self.pins(mem_type) {
            return;
        }
        if let Err(err) = self.pinner.unpin_pages(desc.addr, desc.len) {
            error!("agent {} failed to unpin {desc:?}: {err}", self.name);
        }
    }
}

impl DescBuilder for Agent {
    fn get_xfer_descs<I>(
        &self,
        descs: I,
        mem_type: MemType,
        sorted: bool,
    ) -> Result<XferDescList>
    where
        I: IntoIterator,
        I::Item: Into<Desc>,
    {
        let list = XferDescList::from_descs(mem_type, sorted, descs);
        debug!(
            "agent {} built {} {mem_type} xfer descs, sorted: {sorted}",
            self.name,
            list.desc_count()
        );
        Ok(list)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
