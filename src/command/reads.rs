use crate::{Master, datagram::ReceivedDatagram, error::Error};
use catline_wire::WireReadSized;

/// Read commands.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Reads {
    /// APRD: auto increment (positional) physical read.
    Aprd {
        /// Auto increment counter, the negated slave position.
        address: u16,
        /// Register address.
        register: u16,
    },
    /// FPRD: configured (fixed) address physical read.
    Fprd {
        /// Configured station address.
        address: u16,
        /// Register address.
        register: u16,
    },
    /// BRD: broadcast read.
    Brd {
        /// Zeroed on send; each responding slave increments it.
        address: u16,
        /// Register address.
        register: u16,
    },
    /// LRD: logical read.
    Lrd {
        /// Logical address.
        address: u32,
    },
    /// FRMW: configured address read, multiple write.
    Frmw {
        /// Configured station address.
        address: u16,
        /// Register address.
        register: u16,
    },
    /// ARMW: auto increment read, multiple write.
    Armw {
        /// Auto increment counter.
        address: u16,
        /// Register address.
        register: u16,
    },
}

/// A read command bound to working counter behaviour, ready to execute
/// against a [`Master`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WrappedRead {
    pub(crate) command: Reads,
    /// Expected working counter; `None` ignores the returned value.
    wkc: Option<u16>,
}

impl WrappedRead {
    pub(crate) fn new(command: Reads) -> Self {
        Self {
            command,
            wkc: Some(1),
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

    /// Receive a fixed size type.
    pub async fn receive<T>(self, master: &Master<'_>) -> Result<T, Error>
    where
        T: WireReadSized,
    {
        let response = master
            .single_datagram(self.command.into(), (), Some(T::PACKED_LEN as u16))
            .await?;

        self.check_wkc(response.working_counter)?;

        Ok(T::unpack_from_slice(&response)?)
    }

    /// Receive a fixed size type along with the response's working counter,
    /// skipping the expectation check.
    pub async fn receive_wkc<T>(self, master: &Master<'_>) -> Result<(T, u16), Error>
    where
        T: WireReadSized,
    {
        let response = master
            .single_datagram(self.command.into(), (), Some(T::PACKED_LEN as u16))
            .await?;

        let value = T::unpack_from_slice(&response)?;

        Ok((value, response.working_counter))
    }

    /// Receive a run of raw bytes of the given length.
    pub async fn receive_slice<'master>(
        self,
        master: &'master Master<'master>,
        len: u16,
    ) -> Result<ReceivedDatagram<'master>, Error> {
        let response = master
            .single_datagram(self.command.into(), (), Some(len))
            .await?;

        self.check_wkc(response.working_counter)?;

        Ok(response)
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
