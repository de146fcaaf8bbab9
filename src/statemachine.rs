//! The IEEE 1149.1 TAP controller.  Every state has two successors, picked by the level of TMS
//! on the next TCK edge.  SVF restricts where a scan may start and end to the four stable states
//! and fixes the path taken between them; those paths are recorded here so that
//! [`Jtag`](crate::jtag::Jtag) always walks the same route as an SVF player would.
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TapState {
    Reset = 0,
    Idle = 1,
    SelectDR = 2,
    CaptureDR = 3,
    ShiftDR = 4,
    Exit1DR = 5,
    PauseDR = 6,
    Exit2DR = 7,
    UpdateDR = 8,
    SelectIR = 9,
    CaptureIR = 10,
    ShiftIR = 11,
    Exit1IR = 12,
    PauseIR = 13,
    Exit2IR = 14,
    UpdateIR = 15,
}

use TapState::*;

/// Successor of each state for TMS = 0 and TMS = 1, indexed by discriminant.
const NEXT: [[TapState; 2]; 16] = [
    [Idle, Reset],          // Reset
    [Idle, SelectDR],       // Idle
    [CaptureDR, SelectIR],  // SelectDR
    [ShiftDR, Exit1DR],     // CaptureDR
    [ShiftDR, Exit1DR],     // ShiftDR
    [PauseDR, UpdateDR],    // Exit1DR
    [PauseDR, Exit2DR],     // PauseDR
    [ShiftDR, UpdateDR],    // Exit2DR
    [Idle, SelectDR],       // UpdateDR
    [CaptureIR, Reset],     // SelectIR
    [ShiftIR, Exit1IR],     // CaptureIR
    [ShiftIR, Exit1IR],     // ShiftIR
    [PauseIR, UpdateIR],    // Exit1IR
    [PauseIR, Exit2IR],     // PauseIR
    [ShiftIR, UpdateIR],    // Exit2IR
    [Idle, SelectDR],       // UpdateIR
];

/// TMS high for five clocks reaches Reset from anywhere.
pub const RESET_TMS: [bool; 5] = [true; 5];

impl TapState {
    pub const ALL: [TapState; 16] = [
        Reset, Idle, SelectDR, CaptureDR, ShiftDR, Exit1DR, PauseDR, Exit2DR, UpdateDR,
        SelectIR, CaptureIR, ShiftIR, Exit1IR, PauseIR, Exit2IR, UpdateIR,
    ];

    /// SVF only allows scans to end in one of these.
    pub fn is_stable(self) -> bool {
        matches!(self, Reset | Idle | PauseDR | PauseIR)
    }

    /// State entered on the next TCK with TMS at `tms`.
    pub fn next(self, tms: bool) -> TapState {
        NEXT[self as usize][tms as usize]
    }

    /// TMS level that moves this state to `next`, if `next` is a direct successor.
    pub fn transition(self, next: TapState) -> Option<bool> {
        let [zero, one] = NEXT[self as usize];
        if zero == next {
            Some(false)
        } else if one == next {
            Some(true)
        } else {
            None
        }
    }

    /// The states visited on the SVF path from `self` to `to`, not including `self`.
    pub fn svf_path(self, to: TapState) -> Option<&'static [TapState]> {
        let path: &'static [TapState] = match (self, to) {
            (Reset, Reset) => &[],
            (Reset, Idle) => &[Idle],
            (Reset, ShiftDR) => &[Idle, SelectDR, CaptureDR, ShiftDR],
            (Reset, PauseDR) => &[Idle, SelectDR, CaptureDR, Exit1DR, PauseDR],
            (Reset, ShiftIR) => &[Idle, SelectDR, SelectIR, CaptureIR, ShiftIR],
            (Reset, PauseIR) => &[Idle, SelectDR, SelectIR, CaptureIR, Exit1IR, PauseIR],

            (Idle, Reset) => &[SelectDR, SelectIR, Reset],
            (Idle, Idle) => &[],
            (Idle, ShiftDR) => &[SelectDR, CaptureDR, ShiftDR],
            (Idle, PauseDR) => &[SelectDR, CaptureDR, Exit1DR, PauseDR],
            (Idle, ShiftIR) => &[SelectDR, SelectIR, CaptureIR, ShiftIR],
            (Idle, PauseIR) => &[SelectDR, SelectIR, CaptureIR, Exit1IR, PauseIR],

            (ShiftDR, Reset) => &[Exit1DR, UpdateDR, SelectDR, SelectIR, Reset],
            (ShiftDR, Idle) => &[Exit1DR, UpdateDR, Idle],
            (ShiftDR, PauseDR) => &[Exit1DR, UpdateDR, SelectDR, CaptureDR, Exit1DR, PauseDR],
            (ShiftDR, PauseIR) => {
                &[Exit1DR, UpdateDR, SelectDR, SelectIR, CaptureIR, Exit1IR, PauseIR]
            }

            (Exit1DR, Reset) => &[UpdateDR, SelectDR, SelectIR, Reset],
            (Exit1DR, Idle) => &[UpdateDR, Idle],
            (Exit1DR, PauseDR) => &[UpdateDR, SelectDR, CaptureDR, Exit1DR, PauseDR],
            (Exit1DR, PauseIR) => &[UpdateDR, SelectDR, SelectIR, CaptureIR, Exit1IR, PauseIR],

            (PauseDR, Reset) => &[Exit2DR, UpdateDR, SelectDR, SelectIR, Reset],
            (PauseDR, Idle) => &[Exit2DR, UpdateDR, Idle],
            (PauseDR, ShiftDR) => &[Exit2DR, UpdateDR, SelectDR, CaptureDR, ShiftDR],
            (PauseDR, PauseDR) => &[Exit2DR, UpdateDR, SelectDR, CaptureDR, Exit1DR, PauseDR],
            (PauseDR, ShiftIR) => &[Exit2DR, UpdateDR, SelectDR, SelectIR, CaptureIR, ShiftIR],
            (PauseDR, PauseIR) => {
                &[Exit2DR, UpdateDR, SelectDR, SelectIR, CaptureIR, Exit1IR, PauseIR]
            }

            (ShiftIR, Reset) => &[Exit1IR, UpdateIR, SelectDR, SelectIR, Reset],
            (ShiftIR, Idle) => &[Exit1IR, UpdateIR, Idle],
            (ShiftIR, PauseDR) => &[Exit1IR, UpdateIR, SelectDR, CaptureDR, Exit1DR, PauseDR],
            (ShiftIR, PauseIR) => {
                &[Exit1IR, UpdateIR, SelectDR, SelectIR, CaptureIR, Exit1IR, PauseIR]
            }

            (Exit1IR, Reset) => &[UpdateIR, SelectDR, SelectIR, Reset],
            (Exit1IR, Idle) => &[UpdateIR, Idle],
            (Exit1IR, PauseDR) => &[UpdateIR, SelectDR, CaptureDR, Exit1DR, PauseDR],
            (Exit1IR, PauseIR) => &[UpdateIR, SelectDR, SelectIR, CaptureIR, Exit1IR, PauseIR],

            (PauseIR, Reset) => &[Exit2IR, UpdateIR, SelectDR, SelectIR, Reset],
            (PauseIR, Idle) => &[Exit2IR, UpdateIR, Idle],
            (PauseIR, ShiftDR) => &[Exit2IR, UpdateIR, SelectDR, CaptureDR, ShiftDR],
            (PauseIR, PauseDR) => &[Exit2IR, UpdateIR, SelectDR, CaptureDR, Exit1DR, PauseDR],
            (PauseIR, ShiftIR) => &[Exit2IR, UpdateIR, SelectDR, SelectIR, CaptureIR, ShiftIR],
            (PauseIR, PauseIR) => {
                &[Exit2IR, UpdateIR, SelectDR, SelectIR, CaptureIR, Exit1IR, PauseIR]
            }

            _ => return None,
        };
        Some(path)
    }

    /// TMS levels that walk the SVF path from `self` to `to`, first clock first.
    pub fn tms_path(self, to: TapState) -> Result<Vec<bool>> {
        let path = self.svf_path(to).ok_or(Error::NoPath { from: self, to })?;

        let mut from = self;
        let mut tms = Vec::with_capacity(path.len());
        for &state in path {
            tms.push(from.transition(state).ok_or(Error::NoPath { from, to: state })?);
            from = state;
        }
        Ok(tms)
    }
}

/// Pack TMS levels LSB first: the first clock goes in bit 0.
pub fn pack_tms(tms: &[bool]) -> u8 {
    debug_assert!(tms.len() <= 8);
    tms.iter()
        .enumerate()
        .fold(0, |acc, (i, &bit)| acc | ((bit as u8) << i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(from: TapState, tms: &[bool]) -> TapState {
        tms.iter().fold(from, |state, &bit| state.next(bit))
    }

    #[test]
    fn every_state_has_both_successors() {
        for (i, state) in TapState::ALL.iter().enumerate() {
            assert_eq!(*state as usize, i);
            for tms in [false, true] {
                let next = state.next(tms);
                assert_eq!(state.transition(next), Some(tms), "{:?} -> {:?}", state, next);
            }
        }
    }

    #[test]
    fn only_four_states_are_stable() {
        let stable: Vec<_> = TapState::ALL.iter().filter(|s| s.is_stable()).collect();
        assert_eq!(stable, [&Reset, &Idle, &PauseDR, &PauseIR]);
    }

    #[test]
    fn recorded_paths_land_on_their_target() {
        let mut checked = 0;
        for from in TapState::ALL {
            for to in TapState::ALL {
                let Some(path) = from.svf_path(to) else {
                    assert!(from.tms_path(to).is_err());
                    continue;
                };
                let tms = from.tms_path(to).unwrap();
                assert_eq!(tms.len(), path.len());
                assert_eq!(walk(from, &tms), to, "{:?} -> {:?}", from, to);
                checked += 1;
            }
        }
        assert_eq!(checked, 40);
    }

    #[test]
    fn stable_states_reach_each_other() {
        for from in TapState::ALL.into_iter().filter(|s| s.is_stable()) {
            for to in TapState::ALL.into_iter().filter(|s| s.is_stable()) {
                assert!(from.svf_path(to).is_some(), "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn five_clocks_of_tms_high_reset_from_anywhere() {
        for from in TapState::ALL {
            assert_eq!(walk(from, &RESET_TMS), Reset, "from {:?}", from);
        }
        for from in [Reset, Idle, ShiftDR, PauseIR] {
            assert_eq!(walk(from, &RESET_TMS), Reset);
        }
    }

    #[test]
    fn idle_to_shift_ir_packs_lsb_first() {
        let tms = Idle.tms_path(ShiftIR).unwrap();
        assert_eq!(tms, [true, true, false, false]);
        assert_eq!(pack_tms(&tms), 0b0011);
        assert_eq!(pack_tms(&RESET_TMS), 0x1f);
    }

    #[test]
    fn shift_states_cannot_jump_to_shift() {
        assert!(matches!(
            ShiftDR.tms_path(ShiftIR),
            Err(Error::NoPath {
                from: ShiftDR,
                to: ShiftIR,
            })
        ));
        assert!(CaptureDR.svf_path(Idle).is_none());
    }
}
