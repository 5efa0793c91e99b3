//! Opcode names and decoded instructions.
//!
//! `OpName` covers the Python 2.7 instruction set plus the handful of
//! Python 3 opcodes the interpreter understands (`DUP_TOP_TWO`,
//! `POP_EXCEPT`, `LOAD_BUILD_CLASS`). Names serialize as the CPython
//! spelling, e.g. `"BINARY_ADD"` or `"SLICE_0"`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every opcode the decoder can hand to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpName {
    Nop,
    PopTop,
    RotTwo,
    RotThree,
    RotFour,
    DupTop,
    DupTopx,
    DupTopTwo,

    UnaryPositive,
    UnaryNegative,
    UnaryNot,
    UnaryConvert,
    UnaryInvert,

    BinaryPower,
    BinaryMultiply,
    BinaryDivide,
    BinaryModulo,
    BinaryAdd,
    BinarySubtract,
    BinarySubscr,
    BinaryFloorDivide,
    BinaryTrueDivide,
    BinaryLshift,
    BinaryRshift,
    BinaryAnd,
    BinaryXor,
    BinaryOr,

    InplaceFloorDivide,
    InplaceTrueDivide,
    InplaceAdd,
    InplaceSubtract,
    InplaceMultiply,
    InplaceDivide,
    InplaceModulo,
    InplacePower,
    InplaceLshift,
    InplaceRshift,
    InplaceAnd,
    InplaceXor,
    InplaceOr,

    #[serde(rename = "SLICE_0")]
    Slice0,
    #[serde(rename = "SLICE_1")]
    Slice1,
    #[serde(rename = "SLICE_2")]
    Slice2,
    #[serde(rename = "SLICE_3")]
    Slice3,
    #[serde(rename = "STORE_SLICE_0")]
    StoreSlice0,
    #[serde(rename = "STORE_SLICE_1")]
    StoreSlice1,
    #[serde(rename = "STORE_SLICE_2")]
    StoreSlice2,
    #[serde(rename = "STORE_SLICE_3")]
    StoreSlice3,
    #[serde(rename = "DELETE_SLICE_0")]
    DeleteSlice0,
    #[serde(rename = "DELETE_SLICE_1")]
    DeleteSlice1,
    #[serde(rename = "DELETE_SLICE_2")]
    DeleteSlice2,
    #[serde(rename = "DELETE_SLICE_3")]
    DeleteSlice3,

    StoreMap,
    StoreSubscr,
    DeleteSubscr,

    PrintExpr,
    PrintItem,
    PrintNewline,
    PrintItemTo,
    PrintNewlineTo,

    BreakLoop,
    WithCleanup,
    LoadLocals,
    ReturnValue,
    ImportStar,
    ExecStmt,
    YieldValue,
    PopBlock,
    EndFinally,
    PopExcept,
    BuildClass,
    LoadBuildClass,
    StoreLocals,
    GetIter,

    StoreName,
    DeleteName,
    UnpackSequence,
    ForIter,
    ListAppend,
    SetAdd,
    MapAdd,
    StoreAttr,
    DeleteAttr,
    StoreGlobal,
    DeleteGlobal,
    LoadConst,
    LoadName,
    BuildTuple,
    BuildList,
    BuildSet,
    BuildMap,
    LoadAttr,
    CompareOp,
    ImportName,
    ImportFrom,
    JumpForward,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    JumpIfFalse,
    JumpIfTrue,
    JumpAbsolute,
    PopJumpIfFalse,
    PopJumpIfTrue,
    LoadGlobal,
    ContinueLoop,
    SetupLoop,
    SetupExcept,
    SetupFinally,
    SetupWith,
    LoadFast,
    StoreFast,
    DeleteFast,
    RaiseVarargs,
    CallFunction,
    MakeFunction,
    BuildSlice,
    MakeClosure,
    LoadClosure,
    LoadDeref,
    StoreDeref,
    CallFunctionVar,
    CallFunctionKw,
    CallFunctionVarKw,
}

impl OpName {
    /// Whether the opcode carries an integer argument.
    pub fn has_arg(self) -> bool {
        use OpName::*;
        matches!(
            self,
            StoreName
                | DeleteName
                | UnpackSequence
                | ForIter
                | ListAppend
                | SetAdd
                | MapAdd
                | StoreAttr
                | DeleteAttr
                | StoreGlobal
                | DeleteGlobal
                | DupTopx
                | LoadConst
                | LoadName
                | BuildTuple
                | BuildList
                | BuildSet
                | BuildMap
                | LoadAttr
                | CompareOp
                | ImportName
                | ImportFrom
                | JumpForward
                | JumpIfFalseOrPop
                | JumpIfTrueOrPop
                | JumpIfFalse
                | JumpIfTrue
                | JumpAbsolute
                | PopJumpIfFalse
                | PopJumpIfTrue
                | LoadGlobal
                | ContinueLoop
                | SetupLoop
                | SetupExcept
                | SetupFinally
                | SetupWith
                | LoadFast
                | StoreFast
                | DeleteFast
                | RaiseVarargs
                | CallFunction
                | MakeFunction
                | BuildSlice
                | MakeClosure
                | LoadClosure
                | LoadDeref
                | StoreDeref
                | CallFunctionVar
                | CallFunctionKw
                | CallFunctionVarKw
        )
    }

    /// Whether the opcode refers to another instruction (jumps, loop and
    /// handler setup).
    pub fn has_target(self) -> bool {
        use OpName::*;
        matches!(
            self,
            ForIter
                | JumpForward
                | JumpIfFalseOrPop
                | JumpIfTrueOrPop
                | JumpIfFalse
                | JumpIfTrue
                | JumpAbsolute
                | PopJumpIfFalse
                | PopJumpIfTrue
                | ContinueLoop
                | SetupLoop
                | SetupExcept
                | SetupFinally
                | SetupWith
        )
    }

    /// Whether control never falls through to the following instruction.
    pub fn is_terminator(self) -> bool {
        use OpName::*;
        matches!(
            self,
            JumpForward | JumpAbsolute | ReturnValue | RaiseVarargs | BreakLoop | ContinueLoop
        )
    }

    /// The argument indexes `co_names`.
    pub fn uses_name(self) -> bool {
        use OpName::*;
        matches!(
            self,
            StoreName
                | DeleteName
                | StoreAttr
                | DeleteAttr
                | StoreGlobal
                | DeleteGlobal
                | LoadName
                | LoadAttr
                | ImportName
                | ImportFrom
                | LoadGlobal
        )
    }

    /// The argument indexes `co_varnames`.
    pub fn uses_local(self) -> bool {
        matches!(self, OpName::LoadFast | OpName::StoreFast | OpName::DeleteFast)
    }

    /// The argument indexes `co_cellvars + co_freevars`.
    pub fn uses_free(self) -> bool {
        matches!(
            self,
            OpName::LoadClosure | OpName::LoadDeref | OpName::StoreDeref
        )
    }

    /// The argument indexes `co_consts`.
    pub fn uses_const(self) -> bool {
        matches!(self, OpName::LoadConst)
    }
}

impl fmt::Display for OpName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde spelling so logs match the decoder's names.
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// `COMPARE_OP` argument values.
pub mod compare {
    pub const LT: u32 = 0;
    pub const LE: u32 = 1;
    pub const EQ: u32 = 2;
    pub const NE: u32 = 3;
    pub const GT: u32 = 4;
    pub const GE: u32 = 5;
    pub const IN: u32 = 6;
    pub const NOT_IN: u32 = 7;
    pub const IS: u32 = 8;
    pub const IS_NOT: u32 = 9;
    pub const EXC_MATCH: u32 = 10;

    /// Comparisons every object supports, whatever its class defines.
    pub const ALWAYS_SUPPORTED: [u32; 4] = [EQ, NE, IS, IS_NOT];
}

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opcode {
    /// Position of the instruction within its code object, counting from 0.
    pub index: usize,
    pub name: OpName,
    #[serde(default)]
    pub arg: Option<u32>,
    #[serde(default)]
    pub line: u32,
    /// Index of the jump target, for opcodes where `has_target()` holds.
    #[serde(default)]
    pub target: Option<usize>,
}

impl Opcode {
    pub fn new(index: usize, name: OpName, arg: Option<u32>, line: u32) -> Self {
        Self {
            index,
            name,
            arg,
            line,
            target: None,
        }
    }

    pub fn has_arg(&self) -> bool {
        self.name.has_arg()
    }

    /// Whether execution continues with the next instruction in sequence.
    pub fn carry_on_to_next(&self) -> bool {
        !self.name.is_terminator()
    }

    /// Index of the instruction that follows this one.
    pub fn next(&self) -> usize {
        self.index + 1
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.index, self.name)?;
        if let Some(arg) = self.arg {
            write!(f, " {}", arg)?;
        }
        if let Some(target) = self.target {
            write!(f, " -> {}", target)?;
        }
        Ok(())
    }
}
