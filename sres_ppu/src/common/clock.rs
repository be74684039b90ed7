//! Clock synchronization between the reference CPU and dependent chips.
//!
//! Every dependent chip carries a [ChipClock] holding its balance against the reference chip.
//! Time is compared in a shared unit: one local cycle of the chip is worth `reference_frequency`
//! units, one reference cycle is worth `frequency` units. A chip stepping forward increases its
//! balance, the reference chip stepping forward decreases the balance of every dependent chip.
//!
//! A negative balance means the chip is behind the reference chip and must run before anything
//! observes its state. A balance of zero or above means it has caught up and yields.
use bitcode::Decode;
use bitcode::Encode;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ChipClock {
    balance: i64,
    frequency: u64,
    reference_frequency: u64,
}

impl ChipClock {
    pub fn new(frequency: u64, reference_frequency: u64) -> Self {
        Self {
            balance: 0,
            frequency,
            reference_frequency,
        }
    }

    /// Advances the chip by `clocks` of its own cycles.
    #[inline]
    pub fn step(&mut self, clocks: u64) {
        self.balance += (clocks * self.reference_frequency) as i64;
    }

    /// Charges `clocks` cycles executed by the reference chip against this chip.
    #[inline]
    pub fn charge(&mut self, clocks: u64) {
        self.balance -= (clocks * self.frequency) as i64;
    }

    /// True if the chip has to run before the reference chip may continue to observe it.
    #[inline]
    pub fn behind(&self) -> bool {
        self.balance < 0
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Drops any accumulated balance. Used at power-on only.
    pub fn reset(&mut self) {
        self.balance = 0;
    }
}

/// A chip executed cooperatively in lock-step with the reference CPU.
pub trait Chip {
    fn name(&self) -> &'static str;

    fn clock(&self) -> &ChipClock;

    fn clock_mut(&mut self) -> &mut ChipClock;

    /// Executes one unit of work. Implementations must advance their clock via
    /// [ChipClock::step] so that repeated calls eventually bring the balance to zero or above.
    fn main(&mut self);

    fn save_state(&self) -> Vec<u8>;

    fn load_state(&mut self, data: &[u8]) -> anyhow::Result<()>;

    /// Runs the chip until it has caught up with the reference chip.
    fn synchronize(&mut self) {
        while self.clock().behind() {
            self.main();
        }
    }
}
