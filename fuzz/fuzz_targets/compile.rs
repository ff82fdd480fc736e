#![no_main]

use libfuzzer_sys::fuzz_target;
use tiergraph::{
    build_initial_graph, compile,
    compiler::{CompilationContext, Suites},
    frontend::{Instruction, MethodDescriptor},
    ir::{BinaryOp, Condition, FieldRef, MethodId, UnaryOp, ValueKind},
};

const LOCALS: u16 = 4;

const BINARY: [BinaryOp; 9] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::And,
    BinaryOp::Or,
    BinaryOp::Xor,
    BinaryOp::Shl,
    BinaryOp::Shr,
    BinaryOp::UShr,
];

const CONDITIONS: [Condition; 6] = [
    Condition::Eq,
    Condition::Ne,
    Condition::Lt,
    Condition::Le,
    Condition::Gt,
    Condition::Ge,
];

/// Two bytes per instruction: opcode and operand.
fn decode(data: &[u8]) -> Vec<Instruction> {
    let length = data.len() / 2;
    let field = |operand: u8| FieldRef::new("Fuzz", "f", u16::from(operand % 4), ValueKind::Int);
    data.chunks_exact(2)
        .map(|pair| {
            let operand = pair[1];
            let target = usize::from(operand) % length.max(1);
            match pair[0] % 16 {
                0 => Instruction::IConst(i32::from(operand as i8)),
                1 => Instruction::Load(u16::from(operand) % LOCALS),
                2 => Instruction::Store(u16::from(operand) % LOCALS),
                3 => Instruction::Binary(BINARY[usize::from(operand) % BINARY.len()], ValueKind::Int),
                4 => Instruction::Unary(UnaryOp::Neg, ValueKind::Int),
                5 => Instruction::Compare(CONDITIONS[usize::from(operand) % CONDITIONS.len()]),
                6 => Instruction::If {
                    condition: CONDITIONS[usize::from(operand) % CONDITIONS.len()],
                    target,
                },
                7 => Instruction::Goto(target),
                8 => Instruction::ReturnValue,
                9 => Instruction::New {
                    class: "Fuzz".into(),
                    fields: 4,
                },
                10 => Instruction::GetField(field(operand)),
                11 => Instruction::PutField(field(operand)),
                12 => Instruction::NullCheck,
                13 => Instruction::Pop,
                14 => Instruction::Dup,
                _ => Instruction::LConst(i64::from(operand)),
            }
        })
        .collect()
}

fuzz_target!(|data: &[u8]| {
    let method = MethodDescriptor::new(MethodId(0), "fuzz")
        .with_parameters(&[ValueKind::Int, ValueKind::Int])
        .with_max_locals(LOCALS)
        .returning(ValueKind::Int)
        .with_code(decode(data));

    // Malformed input must surface as an error, never as a panic.
    if let Ok(graph) = build_initial_graph(&method) {
        let _ = compile(graph, &Suites::standard(), &CompilationContext::default());
    }
});
