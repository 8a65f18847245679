pub mod exec;
pub mod instr;

pub use exec::{Executable, PackedFunc, VmFunction};
pub use instr::{ConstIdx, FuncIdx, Instruction, Opcode, PackedIdx, Reg};
