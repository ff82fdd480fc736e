//! Benchmarks for the compilation pipeline.
//!
//! Measures the individual stages on generated methods of growing size:
//! - Graph construction from bytecode
//! - Canonicalization to a fixpoint
//! - Scheduling under both policies
//! - Full tiered compilation, sequential and through a parallel session

extern crate tiergraph;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tiergraph::{
    build_initial_graph,
    canonical::canonicalize,
    compile,
    compiler::{CompilationContext, CompilerConfig, SchedulePolicy, Suites, TargetDescription},
    frontend::{Instruction, MethodDescriptor},
    ir::{BinaryOp, Condition, MethodId, ValueKind},
    schedule::schedule,
    session::CompilerSession,
};

const SIZES: [usize; 3] = [8, 64, 512];

/// A loop whose body is `terms` arithmetic updates of an accumulator, with
/// constant subexpressions for the canonicalizer to fold.
///
/// ```text
/// acc = 0; i = 0
/// while i < n { acc = (acc + i * 4) | (2 + 3) ... ; i = i + 1 }
/// return acc
/// ```
fn arithmetic_loop(id: u32, terms: usize) -> MethodDescriptor {
    let mut code = vec![
        Instruction::IConst(0),
        Instruction::Store(1),
        Instruction::IConst(0),
        Instruction::Store(2),
        Instruction::Load(2),
        Instruction::Load(0),
    ];
    let exit_jump = code.len();
    code.push(Instruction::Goto(0));

    for term in 0..terms {
        code.extend([
            Instruction::Load(1),
            Instruction::Load(2),
            Instruction::IConst(4),
            Instruction::Binary(BinaryOp::Mul, ValueKind::Int),
            Instruction::Binary(BinaryOp::Add, ValueKind::Int),
            Instruction::IConst(2),
            Instruction::IConst(term as i32),
            Instruction::Binary(BinaryOp::Add, ValueKind::Int),
            Instruction::Binary(BinaryOp::Or, ValueKind::Int),
            Instruction::Store(1),
        ]);
    }
    code.extend([
        Instruction::Load(2),
        Instruction::IConst(1),
        Instruction::Binary(BinaryOp::Add, ValueKind::Int),
        Instruction::Store(2),
        Instruction::Goto(4),
    ]);
    code[exit_jump] = Instruction::If {
        condition: Condition::Ge,
        target: code.len(),
    };
    code.extend([Instruction::Load(1), Instruction::ReturnValue]);

    MethodDescriptor::new(MethodId(id), format!("loop{terms}"))
        .with_parameters(&[ValueKind::Int])
        .with_max_locals(3)
        .returning(ValueKind::Int)
        .with_code(code)
}

fn bench_build_initial_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_initial_graph");
    for terms in SIZES {
        let method = arithmetic_loop(1, terms);
        group.throughput(Throughput::Elements(method.code.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(terms), &method, |b, method| {
            b.iter(|| black_box(build_initial_graph(black_box(method)).unwrap()));
        });
    }
    group.finish();
}

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");
    for terms in SIZES {
        let graph = build_initial_graph(&arithmetic_loop(1, terms)).unwrap();
        group.throughput(Throughput::Elements(graph.node_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(terms), &graph, |b, graph| {
            b.iter_batched(
                || graph.clone(),
                |mut graph| black_box(canonicalize(&mut graph).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");
    for terms in SIZES {
        let mut graph = build_initial_graph(&arithmetic_loop(1, terms)).unwrap();
        canonicalize(&mut graph).unwrap();
        for policy in [SchedulePolicy::Earliest, SchedulePolicy::Latest] {
            group.bench_with_input(
                BenchmarkId::new(policy.to_string(), terms),
                &graph,
                |b, graph| b.iter(|| black_box(schedule(graph, policy).unwrap())),
            );
        }
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let suites = Suites::standard();
    let mut group = c.benchmark_group("compile");
    for terms in SIZES {
        let graph = build_initial_graph(&arithmetic_loop(1, terms)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(terms), &graph, |b, graph| {
            b.iter_batched(
                || graph.clone(),
                |graph| {
                    let ctx = CompilationContext::default();
                    black_box(compile(graph, &suites, &ctx).unwrap())
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_session(c: &mut Criterion) {
    let methods: Vec<MethodDescriptor> = (0..64).map(|i| arithmetic_loop(i, 32)).collect();
    let session = CompilerSession::new(CompilerConfig::default(), TargetDescription::amd64());

    let mut group = c.benchmark_group("session");
    group.throughput(Throughput::Elements(methods.len() as u64));
    group.bench_function("compile_all_64", |b| {
        b.iter(|| black_box(session.compile_all(black_box(&methods))));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_build_initial_graph,
    bench_canonicalize,
    bench_schedule,
    bench_compile,
    bench_session,
);
criterion_main!(benches);
