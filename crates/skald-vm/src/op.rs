//! Opcode definitions for the Skald VM
//!
//! The instruction stream is a flat sequence of 16-bit words. Each opcode
//! occupies one word and is followed inline by zero or more operand words;
//! [`Opcode::operand_count`] is the contract the dispatcher and any
//! code-producing front-end share. Jump deltas are relative to the address
//! of the opcode word itself.

use std::fmt;

/// Virtual machine instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// No operation
    Nop = 0,
    /// Stop the dispatcher with no error
    Halt = 1,

    // ===== Loads =====
    /// Push constants[operand]
    LoadConst = 10,
    /// Push locals[operand]
    LoadFast = 11,
    /// Push globals[operand]
    LoadGlobal = 12,
    /// Push the dereferenced free-variable cell at operand
    LoadFree = 13,
    /// Pop receiver, push its attribute named names[operand]
    LoadAttr = 14,
    /// Push a copy of the slot operand positions below the top
    Copy = 15,

    // ===== Stores =====
    /// Pop into locals[operand]
    StoreFast = 20,
    /// Pop into globals[operand]
    StoreGlobal = 21,
    /// Pop into the free-variable cell at operand
    StoreFree = 22,
    /// Pop receiver then value, set attribute names[operand]
    StoreAttr = 23,

    // ===== Closures & cells =====
    /// Pop operand2 cells, close over the function constant at operand1
    LoadClosure = 30,
    /// Capture locals[operand1] of the frame operand2 levels up as a cell
    MakeCell = 31,

    // ===== Literals =====
    /// Push nil
    Nil = 40,
    /// Push true
    True = 41,
    /// Push false
    False = 42,
    /// Pop operand items, push a list (bottom-most item first)
    BuildList = 43,
    /// Pop operand (value, key) pairs, push a map
    BuildMap = 44,
    /// Pop operand items, push a set
    BuildSet = 45,
    /// Pop operand items, push their joined string form
    BuildString = 46,

    // ===== Operators =====
    /// Pop operand count then apply the binary operator selected by operand
    BinaryOp = 50,
    /// Pop two operands, push the comparison selected by operand
    CompareOp = 51,
    /// Pop a number, push its negation
    UnaryNegative = 52,
    /// Pop a value, push the negation of its truthiness
    UnaryNot = 53,
    /// Pop item then container, push membership (operand 1 inverts)
    ContainsOp = 54,

    // ===== Subscripting =====
    /// Pop index then container, push container[index]
    BinarySubscr = 60,
    /// Pop index, container, value; container[index] = value
    StoreSubscr = 61,
    /// Pop start, stop, container; push the half-open slice
    Slice = 62,
    /// Pop a container, push its length
    Length = 63,

    // ===== Control flow =====
    /// Pop; jump forward by operand-2 when truthy
    PopJumpForwardIfTrue = 70,
    /// Pop; jump forward by operand-2 when falsy
    PopJumpForwardIfFalse = 71,
    /// Pop; jump backward by operand-2 when truthy
    PopJumpBackwardIfTrue = 72,
    /// Pop; jump backward by operand-2 when falsy
    PopJumpBackwardIfFalse = 73,
    /// Jump forward by operand from the opcode address
    JumpForward = 74,
    /// Jump backward by operand from the opcode address
    JumpBackward = 75,
    /// Advance the iterator on top of the stack or jump past the loop
    ForIter = 76,
    /// Normalize TOS into an iterator
    GetIter = 77,
    /// Pop an iterable, push its iterator
    Range = 78,
    /// Pop a container of exactly operand elements, push them all
    Unpack = 79,

    // ===== Calls & returns =====
    /// Pop operand arguments then the callee, invoke it
    Call = 90,
    /// Pop operand arguments then the callee, push a partial binding
    Partial = 91,
    /// Tear down the active function frame, leaving the return value
    ReturnValue = 92,

    // ===== Modules =====
    /// Pop a module name, push the imported module
    Import = 100,
    /// Pop operand2 names then operand1 path segments, import each name
    FromImport = 101,

    // ===== Concurrency =====
    /// Pop a partial and spawn it on a worker VM
    Go = 110,
    /// Pop a partial and queue it on the active frame's defer list
    Defer = 111,
    /// Pop value then channel, send the value
    Send = 112,
    /// Pop a channel, push the next received value
    Receive = 113,

    // ===== Stack manipulation =====
    /// Discard TOS
    PopTop = 120,
    /// Swap TOS with the slot operand positions below
    Swap = 121,
}

impl Opcode {
    /// Decode an instruction word into an opcode
    pub fn from_u16(word: u16) -> Option<Opcode> {
        let op = match word {
            0 => Opcode::Nop,
            1 => Opcode::Halt,
            10 => Opcode::LoadConst,
            11 => Opcode::LoadFast,
            12 => Opcode::LoadGlobal,
            13 => Opcode::LoadFree,
            14 => Opcode::LoadAttr,
            15 => Opcode::Copy,
            20 => Opcode::StoreFast,
            21 => Opcode::StoreGlobal,
            22 => Opcode::StoreFree,
            23 => Opcode::StoreAttr,
            30 => Opcode::LoadClosure,
            31 => Opcode::MakeCell,
            40 => Opcode::Nil,
            41 => Opcode::True,
            42 => Opcode::False,
            43 => Opcode::BuildList,
            44 => Opcode::BuildMap,
            45 => Opcode::BuildSet,
            46 => Opcode::BuildString,
            50 => Opcode::BinaryOp,
            51 => Opcode::CompareOp,
            52 => Opcode::UnaryNegative,
            53 => Opcode::UnaryNot,
            54 => Opcode::ContainsOp,
            60 => Opcode::BinarySubscr,
            61 => Opcode::StoreSubscr,
            62 => Opcode::Slice,
            63 => Opcode::Length,
            70 => Opcode::PopJumpForwardIfTrue,
            71 => Opcode::PopJumpForwardIfFalse,
            72 => Opcode::PopJumpBackwardIfTrue,
            73 => Opcode::PopJumpBackwardIfFalse,
            74 => Opcode::JumpForward,
            75 => Opcode::JumpBackward,
            76 => Opcode::ForIter,
            77 => Opcode::GetIter,
            78 => Opcode::Range,
            79 => Opcode::Unpack,
            90 => Opcode::Call,
            91 => Opcode::Partial,
            92 => Opcode::ReturnValue,
            100 => Opcode::Import,
            101 => Opcode::FromImport,
            110 => Opcode::Go,
            111 => Opcode::Defer,
            112 => Opcode::Send,
            113 => Opcode::Receive,
            120 => Opcode::PopTop,
            121 => Opcode::Swap,
            _ => return None,
        };
        Some(op)
    }

    /// Number of inline operand words following the opcode
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::LoadConst
            | Opcode::LoadFast
            | Opcode::LoadGlobal
            | Opcode::LoadFree
            | Opcode::LoadAttr
            | Opcode::Copy
            | Opcode::StoreFast
            | Opcode::StoreGlobal
            | Opcode::StoreFree
            | Opcode::StoreAttr
            | Opcode::BuildList
            | Opcode::BuildMap
            | Opcode::BuildSet
            | Opcode::BuildString
            | Opcode::BinaryOp
            | Opcode::CompareOp
            | Opcode::ContainsOp
            | Opcode::PopJumpForwardIfTrue
            | Opcode::PopJumpForwardIfFalse
            | Opcode::PopJumpBackwardIfTrue
            | Opcode::PopJumpBackwardIfFalse
            | Opcode::JumpForward
            | Opcode::JumpBackward
            | Opcode::Unpack
            | Opcode::Call
            | Opcode::Partial
            | Opcode::Swap => 1,
            Opcode::LoadClosure | Opcode::MakeCell | Opcode::ForIter | Opcode::FromImport => 2,
            _ => 0,
        }
    }

    /// Mnemonic used by disassembly and diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Halt => "HALT",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadFast => "LOAD_FAST",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::LoadFree => "LOAD_FREE",
            Opcode::LoadAttr => "LOAD_ATTR",
            Opcode::Copy => "COPY",
            Opcode::StoreFast => "STORE_FAST",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::StoreFree => "STORE_FREE",
            Opcode::StoreAttr => "STORE_ATTR",
            Opcode::LoadClosure => "LOAD_CLOSURE",
            Opcode::MakeCell => "MAKE_CELL",
            Opcode::Nil => "NIL",
            Opcode::True => "TRUE",
            Opcode::False => "FALSE",
            Opcode::BuildList => "BUILD_LIST",
            Opcode::BuildMap => "BUILD_MAP",
            Opcode::BuildSet => "BUILD_SET",
            Opcode::BuildString => "BUILD_STRING",
            Opcode::BinaryOp => "BINARY_OP",
            Opcode::CompareOp => "COMPARE_OP",
            Opcode::UnaryNegative => "UNARY_NEGATIVE",
            Opcode::UnaryNot => "UNARY_NOT",
            Opcode::ContainsOp => "CONTAINS_OP",
            Opcode::BinarySubscr => "BINARY_SUBSCR",
            Opcode::StoreSubscr => "STORE_SUBSCR",
            Opcode::Slice => "SLICE",
            Opcode::Length => "LENGTH",
            Opcode::PopJumpForwardIfTrue => "POP_JUMP_FORWARD_IF_TRUE",
            Opcode::PopJumpForwardIfFalse => "POP_JUMP_FORWARD_IF_FALSE",
            Opcode::PopJumpBackwardIfTrue => "POP_JUMP_BACKWARD_IF_TRUE",
            Opcode::PopJumpBackwardIfFalse => "POP_JUMP_BACKWARD_IF_FALSE",
            Opcode::JumpForward => "JUMP_FORWARD",
            Opcode::JumpBackward => "JUMP_BACKWARD",
            Opcode::ForIter => "FOR_ITER",
            Opcode::GetIter => "GET_ITER",
            Opcode::Range => "RANGE",
            Opcode::Unpack => "UNPACK",
            Opcode::Call => "CALL",
            Opcode::Partial => "PARTIAL",
            Opcode::ReturnValue => "RETURN_VALUE",
            Opcode::Import => "IMPORT",
            Opcode::FromImport => "FROM_IMPORT",
            Opcode::Go => "GO",
            Opcode::Defer => "DEFER",
            Opcode::Send => "SEND",
            Opcode::Receive => "RECEIVE",
            Opcode::PopTop => "POP_TOP",
            Opcode::Swap => "SWAP",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selector operand for [`Opcode::BinaryOp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BinaryOpType {
    Add = 0,
    Subtract = 1,
    Multiply = 2,
    Divide = 3,
    Modulo = 4,
    Power = 5,
    LShift = 6,
    RShift = 7,
    BitwiseAnd = 8,
    BitwiseOr = 9,
    BitwiseXor = 10,
}

impl BinaryOpType {
    pub fn from_u16(word: u16) -> Option<BinaryOpType> {
        let op = match word {
            0 => BinaryOpType::Add,
            1 => BinaryOpType::Subtract,
            2 => BinaryOpType::Multiply,
            3 => BinaryOpType::Divide,
            4 => BinaryOpType::Modulo,
            5 => BinaryOpType::Power,
            6 => BinaryOpType::LShift,
            7 => BinaryOpType::RShift,
            8 => BinaryOpType::BitwiseAnd,
            9 => BinaryOpType::BitwiseOr,
            10 => BinaryOpType::BitwiseXor,
            _ => return None,
        };
        Some(op)
    }

    /// Operator symbol, used in diagnostics
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOpType::Add => "+",
            BinaryOpType::Subtract => "-",
            BinaryOpType::Multiply => "*",
            BinaryOpType::Divide => "/",
            BinaryOpType::Modulo => "%",
            BinaryOpType::Power => "**",
            BinaryOpType::LShift => "<<",
            BinaryOpType::RShift => ">>",
            BinaryOpType::BitwiseAnd => "&",
            BinaryOpType::BitwiseOr => "|",
            BinaryOpType::BitwiseXor => "^",
        }
    }
}

/// Selector operand for [`Opcode::CompareOp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CompareOpType {
    Equal = 0,
    NotEqual = 1,
    LessThan = 2,
    LessThanOrEqual = 3,
    GreaterThan = 4,
    GreaterThanOrEqual = 5,
}

impl CompareOpType {
    pub fn from_u16(word: u16) -> Option<CompareOpType> {
        let op = match word {
            0 => CompareOpType::Equal,
            1 => CompareOpType::NotEqual,
            2 => CompareOpType::LessThan,
            3 => CompareOpType::LessThanOrEqual,
            4 => CompareOpType::GreaterThan,
            5 => CompareOpType::GreaterThanOrEqual,
            _ => return None,
        };
        Some(op)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOpType::Equal => "==",
            CompareOpType::NotEqual => "!=",
            CompareOpType::LessThan => "<",
            CompareOpType::LessThanOrEqual => "<=",
            CompareOpType::GreaterThan => ">",
            CompareOpType::GreaterThanOrEqual => ">=",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for word in 0..200u16 {
            if let Some(op) = Opcode::from_u16(word) {
                assert_eq!(op as u16, word);
            }
        }
    }

    #[test]
    fn test_operand_counts() {
        assert_eq!(Opcode::Nop.operand_count(), 0);
        assert_eq!(Opcode::LoadConst.operand_count(), 1);
        assert_eq!(Opcode::LoadClosure.operand_count(), 2);
        assert_eq!(Opcode::ForIter.operand_count(), 2);
        assert_eq!(Opcode::ReturnValue.operand_count(), 0);
    }
}
