//! Tests of the cooperative scheduling between a scripted CPU, the PPU and coprocessors.
use std::collections::HashMap;
use std::collections::VecDeque;

use pretty_assertions::assert_eq;
use sres_ppu::common::address::AddressU24;
use sres_ppu::common::bus::BusDeviceU24;
use sres_ppu::common::clock::Chip;
use sres_ppu::common::clock::ChipClock;
use sres_ppu::common::logging;
use sres_ppu::components::ppu::PpuConfig;
use sres_ppu::components::ppu::Region;
use sres_ppu::MainCpu;
use sres_ppu::System;
use sres_ppu::SystemBus;

const MASTER_CLOCK: u64 = 21_477_272;
const ACCESS_CYCLES: u64 = 6;

#[derive(Clone, Copy, Debug)]
enum Op {
    Wait(u64),
    Read(u32),
    Write(u32, u8),
    Pio(u8),
}

/// CPU running a fixed list of bus operations, then idling in steps of 8 master clocks.
#[derive(Default)]
struct ScriptedCpu {
    ops: VecDeque<Op>,
    reads: Vec<u8>,
    idle_steps: u64,
}

impl ScriptedCpu {
    fn new(ops: &[Op]) -> Self {
        Self {
            ops: ops.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl MainCpu for ScriptedCpu {
    fn frequency(&self) -> u64 {
        MASTER_CLOCK
    }

    fn step(&mut self, bus: &mut SystemBus) {
        match self.ops.pop_front() {
            Some(Op::Wait(cycles)) => bus.step(cycles),
            Some(Op::Read(addr)) => {
                bus.step(ACCESS_CYCLES);
                self.reads.push(bus.read(AddressU24::from(addr)));
            }
            Some(Op::Write(addr, value)) => {
                bus.step(ACCESS_CYCLES);
                bus.write(AddressU24::from(addr), value);
            }
            Some(Op::Pio(value)) => {
                bus.step(ACCESS_CYCLES);
                bus.write_pio(value);
            }
            None => {
                self.idle_steps += 1;
                bus.step(8);
            }
        }
    }

    fn save_state(&self) -> Vec<u8> {
        bitcode::encode(&self.idle_steps)
    }

    fn load_state(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.idle_steps = bitcode::decode(data)?;
        Ok(())
    }
}

/// Coprocessor counting its cycles, running at a third of the master clock.
struct CountingChip {
    clock: ChipClock,
    cycles: u64,
}

impl CountingChip {
    fn new() -> Self {
        Self {
            clock: ChipClock::new(MASTER_CLOCK / 3, MASTER_CLOCK),
            cycles: 0,
        }
    }
}

impl Chip for CountingChip {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn clock(&self) -> &ChipClock {
        &self.clock
    }

    fn clock_mut(&mut self) -> &mut ChipClock {
        &mut self.clock
    }

    fn main(&mut self) {
        self.cycles += 1;
        self.clock.step(1);
    }

    fn save_state(&self) -> Vec<u8> {
        bitcode::encode(&self.cycles)
    }

    fn load_state(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.cycles = bitcode::decode(data)?;
        Ok(())
    }
}

#[derive(Default)]
struct Ram {
    memory: HashMap<AddressU24, u8>,
}

impl BusDeviceU24 for Ram {
    fn peek(&self, addr: AddressU24) -> Option<u8> {
        self.memory.get(&addr).copied()
    }

    fn read(&mut self, addr: AddressU24, open_bus: u8) -> u8 {
        self.peek(addr).unwrap_or(open_bus)
    }

    fn write(&mut self, addr: AddressU24, value: u8) {
        self.memory.insert(addr, value);
    }

    fn reset(&mut self) {
        self.memory.clear();
    }
}

#[test]
fn test_ppu_never_behind_after_step() {
    logging::test_init(false);
    let mut system = System::new(
        ScriptedCpu::new(&[Op::Wait(1000), Op::Read(0x213F), Op::Wait(3)]),
        PpuConfig::default(),
    );
    for _ in 0..10_000 {
        system.step();
        assert!(system.bus.ppu.clock().balance() >= 0);
    }
}

#[test]
fn test_counter_latch_sees_cpu_time() {
    // Latch after 2 lines and 400 clocks: 1364 * 2 + 400 = 3128 clocks.
    let mut system = System::new(
        ScriptedCpu::new(&[
            Op::Wait(3128 - ACCESS_CYCLES),
            Op::Read(0x2137),
            Op::Read(0x213C),
            Op::Read(0x213C),
            Op::Read(0x213D),
            Op::Read(0x213D),
        ]),
        PpuConfig::default(),
    );
    for _ in 0..6 {
        system.step();
    }
    // 2137 returns CPU open bus, 0 at power-on. The high counter bytes take bits 1-7 from PPU2
    // open bus.
    assert_eq!(system.cpu.reads, vec![0, 100, 100, 2, 2]);
}

#[test]
fn test_pio_latch() {
    let mut system = System::new(
        ScriptedCpu::new(&[
            Op::Wait(1364 * 5 - ACCESS_CYCLES),
            Op::Pio(0x00),
            Op::Read(0x213F),
            Op::Read(0x213D),
        ]),
        PpuConfig::default(),
    );
    for _ in 0..4 {
        system.step();
    }
    assert_eq!(system.cpu.reads[0] & 0x40, 0x40);
    assert_eq!(system.cpu.reads[1], 5);
}

#[test]
fn test_bus_routing() {
    let mut system = System::new(
        ScriptedCpu::new(&[
            Op::Write(0x7E0010, 0x42),
            Op::Read(0x7E0010),
            // INIDISP is not readable and returns CPU open bus.
            Op::Read(0x002100),
            // PPU registers are not mirrored above bank $3F.
            Op::Read(0x402134),
        ]),
        PpuConfig::default(),
    );
    system.set_memory(Box::<Ram>::default());
    for _ in 0..4 {
        system.step();
    }
    assert_eq!(system.cpu.reads, vec![0x42, 0x42, 0x42]);
    assert_eq!(system.bus.peek(AddressU24::from(0x7E0010)), Some(0x42));
    assert_eq!(system.bus.peek(AddressU24::from(0x002137)), None);
}

#[test]
fn test_chips_follow_reference_time() {
    let mut system = System::new(ScriptedCpu::default(), PpuConfig::default());
    system.add_chip(Box::new(CountingChip::new()));
    system.run_frames(1);
    system.synchronize_all();

    let chip = system.bus.chips().next().unwrap();
    assert!(chip.clock().balance() >= 0);
    assert!(system.bus.ppu.clock().balance() >= 0);
    // The first frame has 262 lines of 1364 clocks.
    assert!(system.bus.cycles() >= 262 * 1364);
    assert!(system.bus.cycles() < 262 * 1364 + 8);
    assert_eq!(system.bus.ppu.counter().frame(), 1);
}

#[test]
fn test_system_state_round_trip() {
    let mut system = System::new(ScriptedCpu::default(), PpuConfig::default());
    system.add_chip(Box::new(CountingChip::new()));
    for _ in 0..5000 {
        system.step();
    }
    let saved = system.save_state();

    let mut restored = System::new(ScriptedCpu::default(), PpuConfig::default());
    restored.add_chip(Box::new(CountingChip::new()));
    restored.load_state(&saved).unwrap();
    assert_eq!(restored.cpu.idle_steps, 5000);
    assert_eq!(restored.bus.cycles(), system.bus.cycles());
    assert_eq!(
        restored.bus.ppu.debug().counters(),
        system.bus.ppu.debug().counters()
    );

    for _ in 0..5000 {
        system.step();
        restored.step();
    }
    assert_eq!(restored.save_state(), system.save_state());

    // The chip configuration must match.
    let mut other = System::new(ScriptedCpu::default(), PpuConfig::default());
    let error = other.load_state(&saved).unwrap_err();
    assert!(error.to_string().starts_with("corrupt system state"));
}

#[test]
fn test_pal_timing() {
    let mut system = System::new(
        ScriptedCpu::default(),
        PpuConfig {
            region: Region::Pal,
            ..Default::default()
        },
    );
    system.run_frames(1);
    assert!(system.bus.cycles() >= 312 * 1364);
}

#[test]
fn test_rejected_state_leaves_system_unchanged() {
    let mut pal = System::new(
        ScriptedCpu::default(),
        PpuConfig {
            region: Region::Pal,
            ..Default::default()
        },
    );
    for _ in 0..50 {
        pal.step();
    }
    let saved = pal.save_state();

    // The CPU accepts its part of the state, the PPU rejects the other region.
    let mut ntsc = System::new(ScriptedCpu::default(), PpuConfig::default());
    for _ in 0..10 {
        ntsc.step();
    }
    let before = ntsc.save_state();
    let error = ntsc.load_state(&saved).unwrap_err();
    assert!(error.to_string().starts_with("corrupt PPU state"));
    assert_eq!(ntsc.cpu.idle_steps, 10);
    assert_eq!(ntsc.bus.cycles(), 80);
    assert!(ntsc.save_state() == before);
}
