//! The closed set of supported GOT-relative idioms and their direct-form
//! rewrites.
//!
//! This is a micro-assembler over fixed byte patterns, not a disassembler:
//! each variant knows its exact encoding length and synthesizes a
//! length-preserving replacement, padded with single-byte nops. Anything
//! outside the set is an unknown indirection and fatal.

use crate::error::{FlatbinError, Result};

const NOP: u8 = 0x90;

/// A recognized GOT-relative instruction form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indirection {
    /// `call qword ptr [rip+disp]` — FF 15 d32
    CallIndirect,
    /// `jmp qword ptr [rip+disp]` — FF 25 d32
    JumpIndirect,
    /// `cmp qword ptr [rip+disp], imm8` — 48 83 3D d32 imm8
    CmpMemImm8 { imm: u8 },
    /// `cmp rbx, qword ptr [rip+disp]` — 48 3B 1D d32
    CmpRbxMem,
    /// `cmp rax, qword ptr [rip+disp]` — 48 3B 05 d32
    CmpRaxMem,
}

impl Indirection {
    /// Match an instruction byte dump against the closed set.
    pub fn classify(code: &[u8]) -> Option<Indirection> {
        match code {
            [0xff, 0x15, _, _, _, _] => Some(Indirection::CallIndirect),
            [0xff, 0x25, _, _, _, _] => Some(Indirection::JumpIndirect),
            [0x48, 0x83, 0x3d, _, _, _, _, imm] => Some(Indirection::CmpMemImm8 { imm: *imm }),
            [0x48, 0x3b, 0x1d, _, _, _, _] => Some(Indirection::CmpRbxMem),
            [0x48, 0x3b, 0x05, _, _, _, _] => Some(Indirection::CmpRaxMem),
            _ => None,
        }
    }

    /// Encoded length of the original instruction; every patch has the same
    /// length.
    pub fn len(&self) -> usize {
        match self {
            Indirection::CallIndirect | Indirection::JumpIndirect => 6,
            Indirection::CmpMemImm8 { .. } => 8,
            Indirection::CmpRbxMem | Indirection::CmpRaxMem => 7,
        }
    }

    /// Synthesize the direct-form replacement bytes.
    ///
    /// `address` is the instruction's virtual address; `target` is the value
    /// currently held by the referenced GOT slot.
    pub fn patch(&self, address: u64, target: u64) -> Result<Vec<u8>> {
        let out = match *self {
            Indirection::CallIndirect => {
                let rel = branch_displacement(address + 5, target)?;
                let mut p = vec![0xe8];
                p.extend_from_slice(&rel.to_le_bytes());
                p.push(NOP);
                p
            }
            Indirection::JumpIndirect => {
                let rel = branch_displacement(address + 5, target)?;
                let mut p = vec![0xe9];
                p.extend_from_slice(&rel.to_le_bytes());
                p.push(NOP);
                p
            }
            Indirection::CmpMemImm8 { imm } => {
                // The comparison outcome is fixed at patch time; emit a
                // flag-equivalent compare of matching length.
                match target.cmp(&(imm as u64)) {
                    std::cmp::Ordering::Equal => {
                        // cmp rax, rax
                        vec![0x48, 0x39, 0xc0, NOP, NOP, NOP, NOP, NOP]
                    }
                    std::cmp::Ordering::Greater => {
                        // cmp rsp, 0
                        vec![0x48, 0x83, 0xfc, 0x00, NOP, NOP, NOP, NOP]
                    }
                    std::cmp::Ordering::Less => {
                        // push rax; xor eax, eax; cmp eax, 1; pop rax
                        // (pop does not touch flags)
                        vec![0x50, 0x31, 0xc0, 0x83, 0xf8, 0x01, 0x58, NOP]
                    }
                }
            }
            Indirection::CmpRbxMem => {
                // cmp ebx, imm32
                let imm = u32::try_from(target).map_err(|_| {
                    FlatbinError::SizeConstraint(format!(
                        "GOT slot value {target:#x} does not fit cmp ebx, imm32"
                    ))
                })?;
                let mut p = vec![0x81, 0xfb];
                p.extend_from_slice(&imm.to_le_bytes());
                p.push(NOP);
                p
            }
            Indirection::CmpRaxMem => {
                // cmp rax, imm32 (sign-extended)
                let imm = i32::try_from(target as i64).map_err(|_| {
                    FlatbinError::SizeConstraint(format!(
                        "GOT slot value {target:#x} does not fit cmp rax, imm32"
                    ))
                })?;
                let mut p = vec![0x48, 0x3d];
                p.extend_from_slice(&imm.to_le_bytes());
                p.push(NOP);
                p
            }
        };
        debug_assert_eq!(out.len(), self.len());
        Ok(out)
    }
}

/// Near-branch displacement with 32-bit two's-complement wraparound.
///
/// `next` is the address of the instruction following the 5-byte branch.
fn branch_displacement(next: u64, target: u64) -> Result<u32> {
    let diff = target.wrapping_sub(next) as i64;
    if diff.unsigned_abs() >= 1 << 31 {
        return Err(FlatbinError::SizeConstraint(format!(
            "branch from {next:#x} to {target:#x} exceeds signed 32-bit range"
        )));
    }
    Ok(diff as u32)
}
