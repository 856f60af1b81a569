//! Per-target registered-parameter (RPN) tuning state.
//!
//! Only three registered parameters matter for a beeper: pitch-bend range,
//! fine tuning and coarse tuning. Everything else is tracked just enough to
//! know that data-entry messages must be ignored.

/// Controller numbers the tuning state machine reacts to.
pub mod controller {
    pub const DATA_ENTRY_MSB: u8 = 0x06;
    pub const DATA_ENTRY_LSB: u8 = 0x26;
    pub const DATA_INCREMENT: u8 = 0x60;
    pub const DATA_DECREMENT: u8 = 0x61;
    pub const RPN_LSB: u8 = 0x64;
    pub const RPN_MSB: u8 = 0x65;

    /// Every controller that influences tuning; all others are dropped at
    /// merge time.
    pub const ALL: [u8; 6] = [
        DATA_ENTRY_MSB,
        DATA_ENTRY_LSB,
        DATA_INCREMENT,
        DATA_DECREMENT,
        RPN_LSB,
        RPN_MSB,
    ];

    pub fn is_tuning(number: u8) -> bool {
        ALL.contains(&number)
    }
}

const PITCH_BEND_RANGE: usize = 0;
const FINE_TUNING: usize = 1;
const COARSE_TUNING: usize = 2;

/// Mask of the two bits that must stay clear for a valid 14-bit value.
const OUT_OF_RANGE: u16 = 0xC000;
const FOURTEEN_BITS: u16 = 0x3FFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningState {
    selector: u16,
    data_latch: u16,
    registers: [u16; 3],
    pitch_bend: i16,
}

impl Default for TuningState {
    fn default() -> Self {
        Self {
            selector: 0,
            data_latch: 0xFFFF,
            registers: [0x0100, 0x2000, 0x2000],
            pitch_bend: 0,
        }
    }
}

impl TuningState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registers(&self) -> [u16; 3] {
        self.registers
    }

    pub fn pitch_bend(&self) -> i16 {
        self.pitch_bend
    }

    pub fn set_pitch_bend(&mut self, value: i16) {
        self.pitch_bend = value;
    }

    /// Applies a controller-change event. Controllers unrelated to tuning are
    /// ignored.
    pub fn apply_controller(&mut self, number: u8, value: u8) {
        let value = u16::from(value & 0x7F);
        match number {
            controller::DATA_ENTRY_MSB => {
                self.data_latch = (value << 7) | (self.data_latch & 0x407F);
                self.commit_latch();
            }
            controller::DATA_ENTRY_LSB => {
                self.data_latch = (self.data_latch & 0xBF80) | value;
                self.commit_latch();
            }
            controller::DATA_INCREMENT => {
                if let Some(register) = self.selected_mut() {
                    *register = register.wrapping_add(1) & FOURTEEN_BITS;
                }
            }
            controller::DATA_DECREMENT => {
                if let Some(register) = self.selected_mut() {
                    *register = register.wrapping_sub(1) & FOURTEEN_BITS;
                }
            }
            controller::RPN_LSB => {
                self.selector = (self.selector & 0xBF80) | value;
            }
            controller::RPN_MSB => {
                self.selector = (value << 7) | (self.selector & 0x407F);
            }
            _ => {}
        }
    }

    fn commit_latch(&mut self) {
        let latch = self.data_latch;
        if latch & OUT_OF_RANGE != 0 {
            return;
        }
        if let Some(register) = self.selected_mut() {
            *register = latch;
        }
    }

    // Selectors beyond coarse tuning (including RPN null) address nothing.
    fn selected_mut(&mut self) -> Option<&mut u16> {
        self.registers.get_mut(usize::from(self.selector))
    }

    /// Pitch-bend range in semitones.
    pub fn pitch_wheel_range(&self) -> f64 {
        let raw = self.registers[PITCH_BEND_RANGE];
        f64::from(raw >> 7) + f64::from(raw & 0x7F) / 100.0
    }

    /// Fine tuning offset in semitones.
    pub fn fine_tuning(&self) -> f64 {
        (f64::from(self.registers[FINE_TUNING]) - 8192.0) / 8192.0
    }

    /// Coarse tuning offset in semitones.
    pub fn coarse_tuning(&self) -> f64 {
        f64::from(self.registers[COARSE_TUNING] >> 7) - 64.0
    }

    /// Fractional semitone value that a note-on for `key` should sound at.
    pub fn effective_pitch(&self, key: u8) -> f64 {
        f64::from(key)
            + f64::from(self.pitch_bend) * self.pitch_wheel_range() / 8192.0
            + self.fine_tuning()
            + self.coarse_tuning()
    }
}

#[cfg(test)]
mod tests {
    use super::controller::*;
    use super::*;

    #[test]
    fn defaults_leave_pitch_untouched() {
        let state = TuningState::new();
        assert_eq!(state.pitch_wheel_range(), 2.0);
        assert_eq!(state.fine_tuning(), 0.0);
        assert_eq!(state.coarse_tuning(), 0.0);
        assert_eq!(state.effective_pitch(69), 69.0);
    }

    #[test]
    fn data_entry_writes_selected_register() {
        let mut state = TuningState::new();
        state.apply_controller(RPN_LSB, 0);
        state.apply_controller(RPN_MSB, 0);
        state.apply_controller(DATA_ENTRY_MSB, 0x20);
        state.apply_controller(DATA_ENTRY_LSB, 0x00);
        assert_eq!(state.registers()[0], 0x1000);

        state.apply_controller(DATA_INCREMENT, 0);
        assert_eq!(state.registers()[0], 0x1001);

        state.apply_controller(DATA_DECREMENT, 0);
        state.apply_controller(DATA_DECREMENT, 0);
        assert_eq!(state.registers()[0], 0x0FFF);
    }

    #[test]
    fn unsupported_selector_disables_writes() {
        let mut state = TuningState::new();
        state.apply_controller(RPN_LSB, 3);
        state.apply_controller(RPN_MSB, 0);
        let before = state.registers();

        state.apply_controller(DATA_INCREMENT, 0);
        state.apply_controller(DATA_ENTRY_MSB, 0x10);
        state.apply_controller(DATA_ENTRY_LSB, 0x10);
        assert_eq!(state.registers(), before);

        state.apply_controller(RPN_LSB, 0x7F);
        state.apply_controller(RPN_MSB, 0x7F);
        state.apply_controller(DATA_DECREMENT, 0);
        assert_eq!(state.registers(), before);
    }

    #[test]
    fn half_written_latch_is_not_committed() {
        let mut state = TuningState::new();
        // The initial latch has the top bits set, so an LSB alone must not
        // reach the register.
        state.apply_controller(DATA_ENTRY_LSB, 0x05);
        assert_eq!(state.registers()[0], 0x0100);

        state.apply_controller(DATA_ENTRY_MSB, 0x0C);
        assert_eq!(state.registers()[0], (0x0C << 7) | 0x05);
        assert!((state.pitch_wheel_range() - 12.05).abs() < 1e-12);
    }

    #[test]
    fn increment_wraps_within_fourteen_bits() {
        let mut state = TuningState::new();
        state.apply_controller(DATA_ENTRY_MSB, 0x7F);
        state.apply_controller(DATA_ENTRY_LSB, 0x7F);
        assert_eq!(state.registers()[0], 0x3FFF);
        state.apply_controller(DATA_INCREMENT, 0);
        assert_eq!(state.registers()[0], 0);
        state.apply_controller(DATA_DECREMENT, 0);
        assert_eq!(state.registers()[0], 0x3FFF);
    }

    #[test]
    fn tuning_offsets_shift_effective_pitch() {
        let mut state = TuningState::new();
        // Coarse tuning +2 semitones.
        state.apply_controller(RPN_LSB, 2);
        state.apply_controller(DATA_ENTRY_MSB, 0x42);
        state.apply_controller(DATA_ENTRY_LSB, 0x00);
        assert_eq!(state.coarse_tuning(), 2.0);

        // Fine tuning +0.5 semitones.
        state.apply_controller(RPN_LSB, 1);
        state.apply_controller(DATA_ENTRY_MSB, 0x60);
        state.apply_controller(DATA_ENTRY_LSB, 0x00);
        assert_eq!(state.fine_tuning(), 0.5);

        state.set_pitch_bend(4096);
        assert_eq!(state.effective_pitch(60), 60.0 + 1.0 + 0.5 + 2.0);
    }

    #[test]
    fn pitch_bend_is_not_clamped() {
        let mut state = TuningState::new();
        state.set_pitch_bend(-8192);
        assert_eq!(state.effective_pitch(69), 67.0);
    }

    #[test]
    fn only_rpn_controllers_count_as_tuning() {
        assert!(is_tuning(0x06));
        assert!(is_tuning(0x65));
        assert!(!is_tuning(0x07));
        assert!(!is_tuning(0x40));
    }
}
