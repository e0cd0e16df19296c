use crate::codec::{self, DataType, Endianness};
use anyhow::anyhow;

pub const REGISTER_SPACE: usize = 65536;

/// Backing store of a simulated slave device. Every space covers the full
/// address range, so remote reads always succeed and return whatever was
/// stored (zero/false until written). Discrete inputs alias the coil space.
pub struct VirtualDevice {
    coils: Box<[bool]>,
    holding: Box<[u16]>,
    input: Box<[u16]>,
}

impl VirtualDevice {
    pub fn new() -> Self {
        Self {
            coils: vec![false; REGISTER_SPACE].into_boxed_slice(),
            holding: vec![0u16; REGISTER_SPACE].into_boxed_slice(),
            input: vec![0u16; REGISTER_SPACE].into_boxed_slice(),
        }
    }

    pub fn coil(&self, addr: u16) -> bool {
        self.coils[addr as usize]
    }

    pub fn discrete_input(&self, addr: u16) -> bool {
        self.coil(addr)
    }

    pub fn holding_register(&self, addr: u16) -> u16 {
        self.holding[addr as usize]
    }

    pub fn input_register(&self, addr: u16) -> u16 {
        self.input[addr as usize]
    }

    pub fn set_coil(&mut self, addr: u16, value: bool) {
        self.coils[addr as usize] = value;
    }

    pub fn set_register(&mut self, addr: u16, value: u16) {
        self.holding[addr as usize] = value;
    }

    fn span(addr: u16, cnt: u16) -> anyhow::Result<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start + cnt as usize;
        if end > REGISTER_SPACE {
            return Err(anyhow!(
                "Block [{}, {}) exceeds the register space.",
                start,
                end
            ));
        }
        Ok(start..end)
    }

    pub fn read_coils(&self, addr: u16, cnt: u16) -> anyhow::Result<Vec<bool>> {
        Ok(self.coils[Self::span(addr, cnt)?].to_vec())
    }

    pub fn read_discrete_inputs(&self, addr: u16, cnt: u16) -> anyhow::Result<Vec<bool>> {
        self.read_coils(addr, cnt)
    }

    pub fn read_holding(&self, addr: u16, cnt: u16) -> anyhow::Result<Vec<u16>> {
        Ok(self.holding[Self::span(addr, cnt)?].to_vec())
    }

    pub fn read_input(&self, addr: u16, cnt: u16) -> anyhow::Result<Vec<u16>> {
        Ok(self.input[Self::span(addr, cnt)?].to_vec())
    }

    /// Local typed write. `Bool` targets the coil space, everything else the
    /// holding registers. The value passes the strict gate, so a span check
    /// is the only other way this can fail.
    pub fn write_typed(
        &mut self,
        addr: u16,
        r#type: DataType,
        text: &str,
        endianness: Endianness,
    ) -> anyhow::Result<()> {
        let needed = r#type.registers_needed();
        if addr as usize + needed > REGISTER_SPACE {
            return Err(anyhow!(
                "{} at address {} needs {} consecutive registers.",
                r#type,
                addr,
                needed
            ));
        }
        if !codec::validate(text, r#type) {
            return Err(anyhow!("Value \"{}\" is invalid for {}.", text, r#type));
        }
        if r#type == DataType::Bool {
            self.coils[addr as usize] = codec::encode(text, r#type)?[0] != 0;
            return Ok(());
        }
        let words = codec::reorder(codec::encode(text, r#type)?, endianness);
        self.holding[addr as usize..addr as usize + needed].copy_from_slice(&words);
        Ok(())
    }

    /// Local write into the input register space. Remote requests can only
    /// read input registers, never write them.
    pub fn write_input_register(&mut self, addr: u16, text: &str) -> anyhow::Result<()> {
        if !codec::validate(text, DataType::UInt16) {
            return Err(anyhow!(
                "Value \"{}\" is invalid for an input register.",
                text
            ));
        }
        self.input[addr as usize] = codec::encode(text, DataType::UInt16)?[0];
        Ok(())
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new()
    }
}
