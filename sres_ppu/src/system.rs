//! Cooperative scheduling of the main CPU and the chips running alongside it.
//!
//! The CPU is the reference chip. It runs freely and charges each of its cycles against the
//! clocks of all dependent chips via [SystemBus::step]. Dependent chips run lazily: the PPU is
//! caught up right before the CPU touches one of its registers, all other chips after each CPU
//! step.
use anyhow::ensure;
use anyhow::Context;
use bitcode::Decode;
use bitcode::Encode;

use crate::common::address::AddressU24;
use crate::common::bus::BusDeviceU24;
use crate::common::clock::Chip;
use crate::common::clock::ChipClock;
use crate::components::ppu::Ppu;
use crate::components::ppu::PpuConfig;

/// The reference chip driving the system.
pub trait MainCpu {
    /// Frequency of the clock counted by [SystemBus::step].
    fn frequency(&self) -> u64;

    /// Executes one unit of work, e.g. an instruction. Must advance time via [SystemBus::step].
    fn step(&mut self, bus: &mut SystemBus);

    fn save_state(&self) -> Vec<u8>;

    fn load_state(&mut self, data: &[u8]) -> anyhow::Result<()>;
}

/// Everything the CPU can reach.
pub struct SystemBus {
    pub ppu: Ppu,
    chips: Vec<Box<dyn Chip>>,
    memory: Option<Box<dyn BusDeviceU24>>,
    /// CPU open bus, the last value seen on the data bus.
    mdr: u8,
    cycles: u64,
}

impl SystemBus {
    fn is_ppu_register(addr: AddressU24) -> bool {
        addr.is_system_area() && (0x2100..=0x213F).contains(&addr.offset)
    }

    /// Number of reference cycles executed since power-on.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn chips(&self) -> impl Iterator<Item = &dyn Chip> {
        self.chips.iter().map(|chip| chip.as_ref())
    }

    /// Advances the reference time by `cycles`, which dependent chips will have to catch up on.
    pub fn step(&mut self, cycles: u64) {
        self.cycles += cycles;
        self.ppu.clock_mut().charge(cycles);
        for chip in self.chips.iter_mut() {
            chip.clock_mut().charge(cycles);
        }
    }

    pub fn read(&mut self, addr: AddressU24) -> u8 {
        let value = if Self::is_ppu_register(addr) {
            self.ppu.synchronize();
            self.ppu.read_io(addr, self.mdr)
        } else if let Some(memory) = self.memory.as_mut() {
            memory.read(addr, self.mdr)
        } else {
            log::warn!("Unhandled read from {}", addr);
            self.mdr
        };
        self.mdr = value;
        value
    }

    pub fn write(&mut self, addr: AddressU24, value: u8) {
        self.mdr = value;
        if Self::is_ppu_register(addr) {
            self.ppu.synchronize();
            self.ppu.write_io(addr, value);
        } else if let Some(memory) = self.memory.as_mut() {
            memory.write(addr, value);
        } else {
            log::warn!("Unhandled write to {} = {:02X}", addr, value);
        }
    }

    /// Updates the programmable IO port of the CPU, which drives the PPU counter latch.
    pub fn write_pio(&mut self, value: u8) {
        self.ppu.synchronize();
        self.ppu.set_pio_latch(value);
    }

    pub fn peek(&self, addr: AddressU24) -> Option<u8> {
        if Self::is_ppu_register(addr) {
            self.ppu.peek_io(addr)
        } else {
            self.memory.as_ref().and_then(|memory| memory.peek(addr))
        }
    }

    /// Runs every dependent chip that is behind the reference chip.
    pub fn synchronize_all(&mut self) {
        self.ppu.synchronize();
        for chip in self.chips.iter_mut() {
            chip.synchronize();
        }
    }
}

#[derive(Encode, Decode)]
struct SystemSnapshot {
    cycles: u64,
    mdr: u8,
    cpu: Vec<u8>,
    ppu: Vec<u8>,
    clocks: Vec<ChipClock>,
    chips: Vec<Vec<u8>>,
}

pub struct System<CpuT: MainCpu> {
    pub cpu: CpuT,
    pub bus: SystemBus,
}

impl<CpuT: MainCpu> System<CpuT> {
    pub fn new(cpu: CpuT, config: PpuConfig) -> Self {
        let mut ppu = Ppu::new(config);
        *ppu.clock_mut() = ChipClock::new(
            ppu.config().region.master_clock_frequency(),
            cpu.frequency(),
        );
        Self {
            cpu,
            bus: SystemBus {
                ppu,
                chips: Vec::new(),
                memory: None,
                mdr: 0,
                cycles: 0,
            },
        }
    }

    /// Attaches a coprocessor. Its clock must use the CPU frequency as reference frequency.
    pub fn add_chip(&mut self, chip: Box<dyn Chip>) {
        log::info!("Attached chip {}", chip.name());
        self.bus.chips.push(chip);
    }

    pub fn set_memory(&mut self, memory: Box<dyn BusDeviceU24>) {
        self.bus.memory = Some(memory);
    }

    pub fn ppu(&mut self) -> &mut Ppu {
        &mut self.bus.ppu
    }

    /// Executes one CPU step and lets all dependent chips catch up.
    pub fn step(&mut self) {
        self.cpu.step(&mut self.bus);
        self.bus.synchronize_all();
    }

    /// Steps until `condition` returns true. The condition is checked after each step.
    pub fn run_until(&mut self, mut condition: impl FnMut(&Self) -> bool) {
        loop {
            self.step();
            if condition(self) {
                break;
            }
        }
    }

    /// Runs until the PPU has started `count` more frames.
    pub fn run_frames(&mut self, count: u64) {
        let target = self.bus.ppu.counter().frame() + count;
        self.run_until(|system| system.bus.ppu.counter().frame() >= target);
    }

    pub fn synchronize_all(&mut self) {
        self.bus.synchronize_all();
    }

    /// Saves CPU, PPU and all chips. Dependent chips are synchronized first, so the snapshot
    /// does not depend on how far they were running behind.
    pub fn save_state(&mut self) -> Vec<u8> {
        self.synchronize_all();
        bitcode::encode(&self.snapshot())
    }

    /// Restores a state from [System::save_state]. If any part rejects its state, the system is
    /// left as it was before the call.
    pub fn load_state(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let snapshot: SystemSnapshot = bitcode::decode(data).context("corrupt system state")?;
        ensure!(
            snapshot.chips.len() == self.bus.chips.len()
                && snapshot.clocks.len() == self.bus.chips.len(),
            "corrupt system state: saved with {} chips, {} attached",
            snapshot.chips.len(),
            self.bus.chips.len()
        );
        let previous = self.snapshot();
        if let Err(error) = self.restore(snapshot) {
            self.restore(previous)
                .context("failed to roll back after a rejected state")?;
            return Err(error);
        }
        Ok(())
    }

    fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            cycles: self.bus.cycles,
            mdr: self.bus.mdr,
            cpu: self.cpu.save_state(),
            ppu: self.bus.ppu.save_state(),
            clocks: self.bus.chips.iter().map(|chip| *chip.clock()).collect(),
            chips: self.bus.chips.iter().map(|chip| chip.save_state()).collect(),
        }
    }

    fn restore(&mut self, snapshot: SystemSnapshot) -> anyhow::Result<()> {
        self.cpu.load_state(&snapshot.cpu)?;
        self.bus.ppu.load_state(&snapshot.ppu)?;
        for ((chip, clock), state) in self
            .bus
            .chips
            .iter_mut()
            .zip(snapshot.clocks)
            .zip(snapshot.chips)
        {
            chip.load_state(&state)
                .with_context(|| format!("failed to restore {}", chip.name()))?;
            *chip.clock_mut() = clock;
        }
        self.bus.cycles = snapshot.cycles;
        self.bus.mdr = snapshot.mdr;
        Ok(())
    }
}
