//! RV64I emulator with machine and supervisor mode CSRs.
//!
//! A flat binary image is copied to the start of DRAM and executed until the
//! PC runs off its end.
//!
//! https://riscv.org/technical/specifications/
//!

use std::fmt;

pub type Uxlen = u64;
pub type Ixlen = i64;

pub mod bits;
pub mod csr;
pub mod decode;
pub mod execute;
pub mod platform;
pub mod registers;

pub use execute::{Hart, Step, StopReason};
pub use platform::{exception::Exception, Config, PrivilegeMode};

/// Drives a single [`Hart`] over one program image.
pub struct Emulator {
    hart: Hart,
    step_limit: Option<u64>,
    stopped: Option<StopReason>,
}

impl Emulator {
    pub fn new(config: Config, image: &[u8]) -> Result<Self, Exception> {
        log::debug!(
            "Loading {} byte image at {:#x}, {} bytes of DRAM",
            image.len(),
            config.dram_base,
            config.dram_size
        );
        Ok(Emulator {
            hart: Hart::new(&config, image)?,
            step_limit: config.step_limit,
            stopped: None,
        })
    }

    /// Runs the program to completion, or until the configured step limit.
    pub fn run(&mut self) -> StopReason {
        let reason = self.hart.run(self.step_limit);
        log::info!("{:?} after {} instructions", reason, self.hart.retired());
        self.stopped = Some(reason.clone());
        reason
    }

    /// Why the last [`Emulator::run`] returned.
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stopped.as_ref()
    }

    pub fn hart(&self) -> &Hart {
        &self.hart
    }

    pub fn hart_mut(&mut self) -> &mut Hart {
        &mut self.hart
    }
}

/// Register, CSR and PC dump.
impl fmt::Display for Emulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-^100}", "registers")?;
        write!(f, "{}", self.hart.registers())?;
        writeln!(f, "{:-^100}", "control status registers")?;
        write!(f, "{}", self.hart.csrs())?;
        writeln!(f, "{:-^100}", "")?;
        writeln!(
            f,
            "pc = {:#018x}   mode = {}   retired = {}",
            self.hart.pc(),
            self.hart.mode(),
            self.hart.retired()
        )?;
        let Some(reason) = &self.stopped else {
            return Ok(());
        };
        write!(f, "stopped: {reason:?}")?;
        if let Some(cause) = reason.cause(self.hart.mode()) {
            let handler = self.hart.csrs().trap_mode(cause, self.hart.mode());
            write!(f, "   mcause = {cause}   trap to {handler}")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_has_every_section() {
        // addi a0, zero, 42
        let image = 0x02a0_0513u32.to_le_bytes();
        let mut emu = Emulator::new(Config::default(), &image).unwrap();
        assert_eq!(emu.run(), StopReason::EndOfProgram);

        let dump = emu.to_string();
        assert!(dump.contains("registers"));
        assert!(dump.contains("control status registers"));
        assert!(dump.contains("x10( a0 ) = 0x000000000000002a"));
        assert!(dump.contains("pc = 0x0000000080000004"));
        assert!(dump.contains("mode = machine"));
    }

    #[test]
    fn dump_reports_trap_cause() {
        // ld a1, 8(zero)
        let image = 0x0080_3583u32.to_le_bytes();
        let mut emu = Emulator::new(Config::default(), &image).unwrap();
        assert_eq!(emu.stop_reason(), None);
        emu.run();
        assert_eq!(
            emu.stop_reason(),
            Some(&StopReason::Fault(Exception::LoadAccessFault(8)))
        );
        let dump = emu.to_string();
        assert!(dump.contains("stopped: Fault(LoadAccessFault(8))"));
        assert!(dump.contains("mcause = 5   trap to machine"));
    }

    #[test]
    fn ecall_in_user_mode_can_be_delegated() {
        // ecall
        let image = 0x0000_0073u32.to_le_bytes();
        let mut emu = Emulator::new(Config::default(), &image).unwrap();
        emu.hart_mut().csrs_mut().write(csr::MEDELEG, 1 << 8).unwrap();
        emu.hart_mut().set_mode(PrivilegeMode::User);
        assert_eq!(emu.run(), StopReason::EnvironmentCall);
        assert!(emu.to_string().contains("mcause = 8   trap to supervisor"));
    }

    #[test]
    fn oversized_image_is_rejected() {
        let config = Config {
            dram_size: 16,
            ..Config::default()
        };
        let image = [0u8; 17];
        assert!(matches!(
            Emulator::new(config, &image),
            Err(Exception::ImageTooLarge { .. })
        ));
    }
}
