use std::convert::TryFrom;

use crate::{FieldIdx, MethodIdx, StringIdx, TypeIdx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    None,
    Literal,
    String,
    Type,
    Field,
    Method,
    Branch,
}

macro_rules! opcodes {
    ($($name:ident = $code:literal, $mnemonic:literal, $units:literal, $operand:ident;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($name = $code,)*
        }

        impl Opcode {
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            /// Width in 16-bit code units.
            pub fn code_units(self) -> u32 {
                match self {
                    $(Opcode::$name => $units,)*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $(Opcode::$name => OperandKind::$operand,)*
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            type Error = u8;

            fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
                match value {
                    $($code => Ok(Opcode::$name),)*
                    _ => Err(value),
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", 1, None;
    Move = 0x01, "move", 1, None;
    MoveObject = 0x07, "move-object", 1, None;
    MoveResult = 0x0a, "move-result", 1, None;
    MoveResultObject = 0x0c, "move-result-object", 1, None;
    MoveException = 0x0d, "move-exception", 1, None;
    ReturnVoid = 0x0e, "return-void", 1, None;
    Return = 0x0f, "return", 1, None;
    ReturnObject = 0x11, "return-object", 1, None;
    Const4 = 0x12, "const/4", 1, Literal;
    Const16 = 0x13, "const/16", 2, Literal;
    Const = 0x14, "const", 3, Literal;
    ConstWide = 0x18, "const-wide", 5, Literal;
    ConstString = 0x1a, "const-string", 2, String;
    ConstClass = 0x1c, "const-class", 2, Type;
    MonitorEnter = 0x1d, "monitor-enter", 1, None;
    MonitorExit = 0x1e, "monitor-exit", 1, None;
    CheckCast = 0x1f, "check-cast", 2, Type;
    InstanceOf = 0x20, "instance-of", 2, Type;
    ArrayLength = 0x21, "array-length", 1, None;
    NewInstance = 0x22, "new-instance", 2, Type;
    NewArray = 0x23, "new-array", 2, Type;
    Throw = 0x27, "throw", 1, None;
    Goto = 0x28, "goto", 1, Branch;
    IfEq = 0x32, "if-eq", 2, Branch;
    IfNe = 0x33, "if-ne", 2, Branch;
    IfEqz = 0x38, "if-eqz", 2, Branch;
    IfNez = 0x39, "if-nez", 2, Branch;
    Aget = 0x44, "aget", 2, None;
    Aput = 0x4b, "aput", 2, None;
    Iget = 0x52, "iget", 2, Field;
    IgetObject = 0x54, "iget-object", 2, Field;
    Iput = 0x59, "iput", 2, Field;
    IputObject = 0x5b, "iput-object", 2, Field;
    Sget = 0x60, "sget", 2, Field;
    SgetObject = 0x62, "sget-object", 2, Field;
    Sput = 0x67, "sput", 2, Field;
    SputObject = 0x69, "sput-object", 2, Field;
    InvokeVirtual = 0x6e, "invoke-virtual", 3, Method;
    InvokeSuper = 0x6f, "invoke-super", 3, Method;
    InvokeDirect = 0x70, "invoke-direct", 3, Method;
    InvokeStatic = 0x71, "invoke-static", 3, Method;
    InvokeInterface = 0x72, "invoke-interface", 3, Method;
    AddInt = 0x90, "add-int", 2, None;
    AddIntLit8 = 0xd8, "add-int/lit8", 2, Literal;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Literal(i64),
    String(StringIdx),
    Type(TypeIdx),
    Field(FieldIdx),
    Method(MethodIdx),
    /// Offset in code units, relative to the instruction.
    Branch(i32),
}

impl Operand {
    pub(crate) const NONE: u8 = 0;
    pub(crate) const LITERAL: u8 = 1;
    pub(crate) const STRING: u8 = 2;
    pub(crate) const TYPE: u8 = 3;
    pub(crate) const FIELD: u8 = 4;
    pub(crate) const METHOD: u8 = 5;
    pub(crate) const BRANCH: u8 = 6;

    pub fn tag(&self) -> u8 {
        match self {
            Operand::None => Self::NONE,
            Operand::Literal(_) => Self::LITERAL,
            Operand::String(_) => Self::STRING,
            Operand::Type(_) => Self::TYPE,
            Operand::Field(_) => Self::FIELD,
            Operand::Method(_) => Self::METHOD,
            Operand::Branch(_) => Self::BRANCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub registers: Vec<u16>,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(opcode: Opcode, registers: Vec<u16>, operand: Operand) -> Self {
        Self {
            opcode,
            registers,
            operand,
        }
    }

    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, vec![], Operand::None)
    }

    pub fn code_units(&self) -> u32 {
        self.opcode.code_units()
    }
}

#[cfg(test)]
mod opcode_tests {
    use super::*;

    #[test]
    fn it_should_decode_known_opcodes() {
        assert_eq!(Ok(Opcode::InvokeVirtual), Opcode::try_from(0x6e));
        assert_eq!(Err(0xff), Opcode::try_from(0xff));
    }

    #[test]
    fn it_should_describe_operands_and_widths() {
        assert_eq!(OperandKind::Method, Opcode::InvokeStatic.operand_kind());
        assert_eq!(3, Opcode::InvokeStatic.code_units());
        assert_eq!(5, Opcode::ConstWide.code_units());
        assert_eq!("const-string", Opcode::ConstString.mnemonic());
    }
}
