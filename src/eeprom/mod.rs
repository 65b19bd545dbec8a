//! SII (EEPROM) access through the slave's register interface.
//!
//! Slave descriptors are built from a handful of well known words and
//! categories; the full ESI category set is out of scope here.

pub mod types;

use crate::{
    Master,
    command::Command,
    error::{EepromError, Error},
    fmt,
    register::RegisterAddress,
    timer_factory::IntoTimeout,
};
use catline_wire::{WireRead, WireReadSized, WireSized, WireWrite};
use types::{
    CategoryType, DefaultMailbox, FmmuUsage, Pdo, PdoEntry, PdoWithBitLen, SiiControl, SiiGeneral,
    SiiOwner, SlaveIdentity, SyncManager, word_address,
};

/// CRC8 over the SII configuration area, polynomial `x^8 + x^2 + x + 1`,
/// initial value `0xff`.
const SII_CRC: crc::Algorithm<u8> = crc::Algorithm {
    width: 8,
    poly: 0x07,
    init: 0xff,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0xf4,
    residue: 0x00,
};

/// EEPROM reader/writer for one slave.
pub(crate) struct Eeprom<'a> {
    master: &'a Master<'a>,
    configured_address: u16,
}

impl<'a> Eeprom<'a> {
    pub fn new(master: &'a Master<'a>, configured_address: u16) -> Self {
        Self {
            master,
            configured_address,
        }
    }

    /// Hand the EEPROM interface to the master or the slave's PDI.
    pub async fn set_owner(&self, owner: SiiOwner) -> Result<(), Error> {
        Command::fpwr(self.configured_address, RegisterAddress::SiiConfig.into())
            .send(self.master, owner as u16)
            .await
    }

    async fn wait_while_busy(&self) -> Result<SiiControl, Error> {
        async {
            loop {
                let control = Command::fprd(
                    self.configured_address,
                    RegisterAddress::SiiControl.into(),
                )
                .receive::<SiiControl>(self.master)
                .await?;

                if !control.busy {
                    break Ok(control);
                }
            }
        }
        .timeout(self.master.timeouts.eeprom)
        .await
    }

    /// Read 4 bytes (2 words) from the given word address.
    async fn read_chunk(&self, word: u16) -> Result<[u8; 4], Error> {
        let mut request = [0u8; 4];

        SiiControl::read().pack_to_slice_unchecked(&mut request[0..2]);
        request[2..4].copy_from_slice(&word.to_le_bytes());

        // Control word and address are adjacent registers, written in one go
        Command::fpwr(self.configured_address, RegisterAddress::SiiControl.into())
            .send(self.master, request)
            .await?;

        let control = self.wait_while_busy().await?;

        if control.has_error() {
            fmt::error!(
                "Slave {:#06x} EEPROM read error at word {:#06x}: {:?}",
                self.configured_address,
                word,
                control
            );

            return Err(EepromError::Control.into());
        }

        Command::fprd(self.configured_address, RegisterAddress::SiiData.into())
            .receive::<[u8; 4]>(self.master)
            .await
    }

    /// Fill `buf` with data starting at the given word address.
    pub async fn read_exact(&self, start_word: u16, buf: &mut [u8]) -> Result<(), Error> {
        let mut word = start_word;
        let mut filled = 0;

        while filled < buf.len() {
            let chunk = self.read_chunk(word).await?;

            let take = chunk.len().min(buf.len() - filled);

            buf[filled..filled + take].copy_from_slice(&chunk[0..take]);

            filled += take;
            word += 2;
        }

        Ok(())
    }

    /// Read a fixed size type from the given word address.
    pub async fn read<T>(&self, start_word: u16) -> Result<T, Error>
    where
        T: WireReadSized,
    {
        let mut buf = T::buffer();

        self.read_exact(start_word, buf.as_mut()).await?;

        Ok(T::unpack_from_slice(buf.as_ref())?)
    }

    /// Write one word. The configuration area checksum is NOT touched; use
    /// [`write_alias`](Eeprom::write_alias) for checksummed fields.
    async fn write_word(&self, word: u16, value: u16) -> Result<(), Error> {
        Command::fpwr(self.configured_address, RegisterAddress::SiiData.into())
            .send(self.master, value)
            .await?;

        let mut request = [0u8; 4];

        SiiControl::write().pack_to_slice_unchecked(&mut request[0..2]);
        request[2..4].copy_from_slice(&word.to_le_bytes());

        Command::fpwr(self.configured_address, RegisterAddress::SiiControl.into())
            .send(self.master, request)
            .await?;

        let control = self.wait_while_busy().await?;

        if control.has_error() {
            return Err(EepromError::Control.into());
        }

        Ok(())
    }

    /// Write a new station alias into the configuration area, updating the
    /// config area checksum to match.
    pub async fn write_alias(&self, alias: u16) -> Result<(), Error> {
        // Checksum covers configuration words 0..7
        let mut config = [0u8; 14];

        self.read_exact(0, &mut config).await?;

        config[(word_address::STATION_ALIAS as usize) * 2..][0..2]
            .copy_from_slice(&alias.to_le_bytes());

        let checksum = crc::Crc::<u8>::new(&SII_CRC).checksum(&config);

        self.write_word(word_address::STATION_ALIAS, alias).await?;
        self.write_word(word_address::CHECKSUM, u16::from(checksum))
            .await?;

        Ok(())
    }

    /// Find a category, returning the word address of its data and its
    /// length in words.
    async fn find_category(&self, category: CategoryType) -> Result<(u16, u16), Error> {
        let mut word = word_address::FIRST_CATEGORY;

        loop {
            let header = self.read_chunk(word).await?;

            let category_type = CategoryType::unpack_from_slice(&header[0..2])?;
            let len_words = u16::unpack_from_slice(&header[2..4])?;

            match category_type {
                t if t == category => break Ok((word + 2, len_words)),
                CategoryType::End => break Err(EepromError::NoCategory.into()),
                _ => word = word
                    .checked_add(2 + len_words)
                    .ok_or(Error::Eeprom(EepromError::SectionOverrun))?,
            }
        }
    }

    pub async fn identity(&self) -> Result<SlaveIdentity, Error> {
        self.read(word_address::IDENTITY).await
    }

    pub async fn mailbox_config(&self) -> Result<DefaultMailbox, Error> {
        let mut buf = [0u8; 18];

        self.read_exact(word_address::MAILBOX_CONFIG, &mut buf)
            .await?;

        Ok(DefaultMailbox::unpack_from_slice(&buf)?)
    }

    pub async fn general(&self) -> Result<SiiGeneral, Error> {
        let (start, _len) = self.find_category(CategoryType::General).await?;

        self.read(start).await
    }

    /// All sync managers defined in the sync manager category.
    pub async fn sync_managers(&self) -> Result<heapless::Vec<SyncManager, 8>, Error> {
        let mut sync_managers = heapless::Vec::new();

        let (start, len_words) = match self.find_category(CategoryType::SyncManager).await {
            Ok(found) => found,
            Err(Error::Eeprom(EepromError::NoCategory)) => return Ok(sync_managers),
            Err(e) => return Err(e),
        };

        let count = usize::from(len_words) * 2 / SyncManager::PACKED_LEN;

        for i in 0..count {
            let sm = self
                .read::<SyncManager>(start + (i * SyncManager::PACKED_LEN / 2) as u16)
                .await?;

            sync_managers
                .push(sm)
                .map_err(|_| Error::Eeprom(EepromError::SectionOverrun))?;
        }

        Ok(sync_managers)
    }

    /// FMMU usage list from the FMMU category.
    pub async fn fmmu_usage(&self) -> Result<heapless::Vec<FmmuUsage, 16>, Error> {
        let mut usages = heapless::Vec::new();

        let (start, len_words) = match self.find_category(CategoryType::Fmmu).await {
            Ok(found) => found,
            Err(Error::Eeprom(EepromError::NoCategory)) => return Ok(usages),
            Err(e) => return Err(e),
        };

        let mut buf = [0u8; 16];

        let count = usize::from(len_words * 2).min(buf.len());

        self.read_exact(start, &mut buf[0..count.next_multiple_of(2)])
            .await?;

        for raw in &buf[0..count] {
            usages
                .push(FmmuUsage::unpack_from_slice(&[*raw])?)
                .map_err(|_| Error::Eeprom(EepromError::SectionOverrun))?;
        }

        Ok(usages)
    }

    /// PDOs and their total bit lengths from the TxPDO (slave inputs to the
    /// master) or RxPDO (outputs) category.
    pub async fn pdos(&self, category: CategoryType) -> Result<heapless::Vec<PdoWithBitLen, 16>, Error> {
        debug_assert!(matches!(
            category,
            CategoryType::TxPdo | CategoryType::RxPdo
        ));

        let mut pdos = heapless::Vec::new();

        let (start, len_words) = match self.find_category(category).await {
            Ok(found) => found,
            Err(Error::Eeprom(EepromError::NoCategory)) => return Ok(pdos),
            Err(e) => return Err(e),
        };

        let end_word = start + len_words;
        let mut word = start;

        while word < end_word {
            let pdo = self.read::<Pdo>(word).await?;

            word += (Pdo::PACKED_LEN / 2) as u16;

            let mut bit_len = 0u16;

            for _ in 0..pdo.num_entries {
                let entry = self.read::<PdoEntry>(word).await?;

                bit_len += u16::from(entry.bit_len);
                word += (PdoEntry::PACKED_LEN / 2) as u16;
            }

            pdos.push(PdoWithBitLen {
                index: pdo.index,
                sync_manager: pdo.sync_manager,
                bit_len,
            })
            .map_err(|_| Error::Eeprom(EepromError::SectionOverrun))?;
        }

        Ok(pdos)
    }

    /// Read a string by its 1-based index in the strings category.
    pub async fn string<const N: usize>(
        &self,
        index: u8,
    ) -> Result<Option<heapless::String<N>>, Error> {
        if index == 0 {
            return Ok(None);
        }

        let (start, _len) = match self.find_category(CategoryType::Strings).await {
            Ok(found) => found,
            Err(Error::Eeprom(EepromError::NoCategory)) => return Ok(None),
            Err(e) => return Err(e),
        };

        // Byte offset from the category start; strings are byte aligned
        // while reads are word aligned, so a small sliding buffer is used.
        let num_strings = self.read_byte(start, 0).await?;

        if index > num_strings {
            return Ok(None);
        }

        let mut byte_offset = 1usize;

        for _ in 1..index {
            let len = self.read_byte(start, byte_offset).await?;

            byte_offset += 1 + usize::from(len);
        }

        let len = usize::from(self.read_byte(start, byte_offset).await?);

        if len > N {
            return Err(Error::StringTooLong {
                max_length: N,
                string_length: len,
            });
        }

        let mut buf = [0u8; N];

        self.read_bytes_unaligned(start, byte_offset + 1, &mut buf[0..len])
            .await?;

        let mut out = heapless::String::new();

        out.push_str(
            core::str::from_utf8(&buf[0..len]).map_err(|_| Error::Eeprom(EepromError::Decode))?,
        )
        .map_err(|_| Error::Eeprom(EepromError::Decode))?;

        Ok(Some(out))
    }

    async fn read_byte(&self, start_word: u16, byte_offset: usize) -> Result<u8, Error> {
        let word = start_word + (byte_offset / 2) as u16;

        let chunk = self.read_chunk(word).await?;

        Ok(chunk[byte_offset % 2])
    }

    async fn read_bytes_unaligned(
        &self,
        start_word: u16,
        byte_offset: usize,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        for (i, out) in buf.iter_mut().enumerate() {
            *out = self.read_byte(start_word, byte_offset + i).await?;
        }

        Ok(())
    }

    /// The device name from the general and strings categories.
    pub async fn device_name<const N: usize>(&self) -> Result<Option<heapless::String<N>>, Error> {
        let general = match self.general().await {
            Ok(general) => general,
            Err(Error::Eeprom(EepromError::NoCategory)) => return Ok(None),
            Err(e) => return Err(e),
        };

        self.string(general.name_string_idx).await
    }
}
