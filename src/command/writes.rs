use crate::{Master, datagram::ReceivedDatagram, error::Error, fmt};
use catline_wire::{WireReadSized, WireWrite};

/// Write commands.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Writes {
    /// APWR: auto increment (positional) physical write.
    Apwr {
        /// Auto increment counter, the negated slave position.
        address: u16,
        /// Register address.
        register: u16,
    },
    /// FPWR: configured (fixed) address physical write.
    Fpwr {
        /// Configured station address.
        address: u16,
        /// Register address.
        register: u16,
    },
    /// BWR: broadcast write.
    Bwr {
        /// Zeroed on send; each responding slave increments it.
        address: u16,
        /// Register address.
        register: u16,
    },
    /// LWR: logical write.
    Lwr {
        /// Logical address.
        address: u32,
    },
    /// LRW: logical read/write.
    Lrw {
        /// Logical address.
        address: u32,
    },
}

/// A write command bound to working counter behaviour, ready to execute
/// against a [`Master`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WrappedWrite {
    pub(crate) command: Writes,
    /// Expected working counter; `None` ignores the returned value.
    wkc: Option<u16>,
    len_override: Option<u16>,
}

impl WrappedWrite {
    pub(crate) fn new(command: Writes) -> Self {
        Self {
            command,
            wkc: Some(1),
            len_override: None,
        }
    }

    /// Do not check the working counter of the response.
    #[must_use = "returns a new command, does not mutate the original"]
    pub fn ignore_wkc(self) -> Self {
        Self { wkc: None, ..self }
    }

    /// Change the expected working counter from its default of 1.
    #[must_use = "returns a new command, does not mutate the original"]
    pub fn with_wkc(self, wkc: u16) -> Self {
        Self {
            wkc: Some(wkc),
            ..self
        }
    }

    /// Pad the datagram payload out to `len` bytes if the written data is
    /// shorter.
    #[must_use = "returns a new command, does not mutate the original"]
    pub fn with_len(self, len: u16) -> Self {
        Self {
            len_override: Some(len),
            ..self
        }
    }

    /// Write a value, discarding the (echoed) response payload.
    pub async fn send(self, master: &Master<'_>, value: impl WireWrite) -> Result<(), Error> {
        let response = master
            .single_datagram(self.command.into(), value, self.len_override)
            .await?;

        self.check_wkc(response.working_counter)?;

        Ok(())
    }

    /// Write a value and decode what the slaves turned it into on the way
    /// back around the ring.
    pub async fn send_receive<T>(
        self,
        master: &Master<'_>,
        value: impl WireWrite,
    ) -> Result<T, Error>
    where
        T: WireReadSized,
    {
        let response = master
            .single_datagram(self.command.into(), value, self.len_override)
            .await?;

        self.check_wkc(response.working_counter)?;

        Ok(T::unpack_from_slice(&response)?)
    }

    /// Write a slice and return the response payload.
    pub async fn send_receive_slice<'master>(
        self,
        master: &'master Master<'master>,
        value: impl WireWrite,
    ) -> Result<ReceivedDatagram<'master>, Error> {
        let response = master
            .single_datagram(self.command.into(), value, self.len_override)
            .await?;

        self.check_wkc(response.working_counter)?;

        Ok(response)
    }

    /// Write a slice and return the response payload along with its working
    /// counter, skipping the expectation check.
    pub async fn send_receive_slice_wkc<'master>(
        self,
        master: &'master Master<'master>,
        value: impl WireWrite,
    ) -> Result<ReceivedDatagram<'master>, Error> {
        master
            .single_datagram(self.command.into(), value, self.len_override)
            .await
    }

    /// Fire-and-forget write: the datagram is sent and its resources are
    /// released when the response returns, without waking any waiter.
    ///
    /// Used on paths that must not block, e.g. the distributed clocks offset
    /// nudge issued from the cyclic receive processing.
    pub fn send_detached(self, master: &Master<'_>, value: impl WireWrite) -> Result<(), Error> {
        if self.wkc.is_some() {
            fmt::trace!("detached write cannot check a working counter");
        }

        master.single_datagram_detached(self.command.into(), value, self.len_override)
    }

    fn check_wkc(&self, received: u16) -> Result<(), Error> {
        match self.wkc {
            Some(expected) if expected != received => Err(Error::WorkingCounter {
                expected,
                received,
            }),
            _ => Ok(()),
        }
    }
}
