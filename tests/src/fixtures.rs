//! Modules shared by the integration tests.

use shade_core::{
    ExceptionHandler, HandlerKind, InstrId, Method, MethodBody, MethodId, MethodRef, MethodSig,
    MethodTarget, Module, Opcode, Operand, TypeDef, TypeSig, WellKnown,
};
use shade_verification::{check_equivalence, Value, VerificationConfig};

pub const MAIN: MethodId = MethodId::new(0, 0);
pub const ABS: MethodId = MethodId::new(0, 1);
pub const SUM: MethodId = MethodId::new(0, 2);
pub const SAFE_DIV: MethodId = MethodId::new(0, 3);
pub const CLASSIFY: MethodId = MethodId::new(0, 4);
pub const GREET: MethodId = MethodId::new(0, 5);
pub const CTOR: MethodId = MethodId::new(0, 6);
pub const GET_VALUE: MethodId = MethodId::new(0, 7);
pub const TWICE: MethodId = MethodId::new(1, 0);
pub const CALLS_TWICE: MethodId = MethodId::new(1, 1);

/// Every method above that takes only integer arguments and can be executed.
pub const EXECUTABLE: [MethodId; 8] = [MAIN, ABS, SUM, SAFE_DIV, CLASSIFY, GREET, TWICE, CALLS_TWICE];

/// Methods with more than one block.
pub const BRANCHING: [MethodId; 5] = [ABS, SUM, SAFE_DIV, CLASSIFY, GREET];

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn static_method(name: &str, params: Vec<TypeSig>, ret: TypeSig, ops: Vec<(Opcode, Operand)>) -> Method {
    let mut method = Method::new(name, MethodSig::static_fn(params, ret));
    method.body = Some(MethodBody::assemble(ops));
    method
}

/// A small application exercising branches, loops, a switch, a catch handler, string
/// literals, console output and an internal call.
pub fn app() -> Module {
    let mut module = Module::new("App.dll");
    let write_line = module.import(WellKnown::ConsoleWriteLine);

    let mut program = TypeDef::new("App", "Program");

    let mut main = static_method(
        "Main",
        vec![],
        TypeSig::Void,
        vec![
            (Opcode::Ldstr, Operand::String("hello".into())),
            (Opcode::Call, Operand::Method(write_line.clone())),
            (Opcode::Ret, Operand::None),
        ],
    );
    main.flags.entry_point = true;
    program.methods.push(main);

    program.methods.push(static_method(
        "Abs",
        vec![TypeSig::I4],
        TypeSig::I4,
        vec![
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::LdcI4, Operand::Int32(0)),
            (Opcode::Bge, Operand::Target(InstrId(6))),
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::Neg, Operand::None),
            (Opcode::Ret, Operand::None),
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::Ret, Operand::None),
        ],
    ));

    // s = 0; i = 0; while (i < n) { s += i; i++; } return s;
    let mut sum = static_method(
        "Sum",
        vec![TypeSig::I4],
        TypeSig::I4,
        vec![
            (Opcode::LdcI4, Operand::Int32(0)),
            (Opcode::Stloc, Operand::Local(0)),
            (Opcode::LdcI4, Operand::Int32(0)),
            (Opcode::Stloc, Operand::Local(1)),
            (Opcode::Br, Operand::Target(InstrId(13))),
            (Opcode::Ldloc, Operand::Local(0)),
            (Opcode::Ldloc, Operand::Local(1)),
            (Opcode::Add, Operand::None),
            (Opcode::Stloc, Operand::Local(0)),
            (Opcode::Ldloc, Operand::Local(1)),
            (Opcode::LdcI4, Operand::Int32(1)),
            (Opcode::Add, Operand::None),
            (Opcode::Stloc, Operand::Local(1)),
            (Opcode::Ldloc, Operand::Local(1)),
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::Blt, Operand::Target(InstrId(5))),
            (Opcode::Ldloc, Operand::Local(0)),
            (Opcode::Ret, Operand::None),
        ],
    );
    if let Some(body) = sum.body.as_mut() {
        body.add_local(TypeSig::I4).unwrap();
        body.add_local(TypeSig::I4).unwrap();
    }
    program.methods.push(sum);

    // try { r = 100 / x; } catch (DivideByZeroException) { r = -1; } return r;
    let mut safe_div = static_method(
        "SafeDiv",
        vec![TypeSig::I4],
        TypeSig::I4,
        vec![
            (Opcode::LdcI4, Operand::Int32(100)),
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::Div, Operand::None),
            (Opcode::Stloc, Operand::Local(0)),
            (Opcode::Leave, Operand::Target(InstrId(8))),
            (Opcode::Pop, Operand::None),
            (Opcode::LdcI4, Operand::Int32(-1)),
            (Opcode::Stloc, Operand::Local(0)),
            (Opcode::Ldloc, Operand::Local(0)),
            (Opcode::Ret, Operand::None),
        ],
    );
    if let Some(body) = safe_div.body.as_mut() {
        body.add_local(TypeSig::I4).unwrap();
        body.handlers.push(ExceptionHandler {
            kind: HandlerKind::Catch,
            try_start: InstrId(0),
            try_end: Some(InstrId(5)),
            handler_start: InstrId(5),
            handler_end: Some(InstrId(8)),
            filter_start: None,
            catch_type: Some("System.DivideByZeroException".into()),
        });
    }
    program.methods.push(safe_div);

    program.methods.push(static_method(
        "Classify",
        vec![TypeSig::I4],
        TypeSig::I4,
        vec![
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::Switch, Operand::Switch(vec![InstrId(4), InstrId(6)])),
            (Opcode::LdcI4, Operand::Int32(-1)),
            (Opcode::Ret, Operand::None),
            (Opcode::LdcI4, Operand::Int32(10)),
            (Opcode::Ret, Operand::None),
            (Opcode::LdcI4, Operand::Int32(20)),
            (Opcode::Ret, Operand::None),
        ],
    ));

    program.methods.push(static_method(
        "Greet",
        vec![TypeSig::I4],
        TypeSig::Void,
        vec![
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::Brfalse, Operand::Target(InstrId(5))),
            (Opcode::Ldstr, Operand::String("nonzero".into())),
            (Opcode::Call, Operand::Method(write_line.clone())),
            (Opcode::Ret, Operand::None),
            (Opcode::Ldstr, Operand::String("zero".into())),
            (Opcode::Call, Operand::Method(write_line)),
            (Opcode::Ret, Operand::None),
        ],
    ));

    let mut ctor = Method::new(".ctor", MethodSig::instance_fn(vec![], TypeSig::Void));
    ctor.flags.constructor = true;
    ctor.body = Some(MethodBody::assemble(vec![(Opcode::Ret, Operand::None)]));
    program.methods.push(ctor);

    let mut getter = Method::new("get_Value", MethodSig::instance_fn(vec![], TypeSig::I4));
    getter.flags.getter = true;
    getter.body = Some(MethodBody::assemble(vec![
        (Opcode::LdcI4, Operand::Int32(3)),
        (Opcode::Ret, Operand::None),
    ]));
    program.methods.push(getter);

    module.types.push(program);

    let mut helpers = TypeDef::new("App", "Helpers");
    let twice_sig = MethodSig::static_fn(vec![TypeSig::I4], TypeSig::I4);
    helpers.methods.push(static_method(
        "Twice",
        vec![TypeSig::I4],
        TypeSig::I4,
        vec![
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::LdcI4, Operand::Int32(2)),
            (Opcode::Mul, Operand::None),
            (Opcode::Ret, Operand::None),
        ],
    ));
    helpers.methods.push(static_method(
        "CallsTwice",
        vec![TypeSig::I4],
        TypeSig::I4,
        vec![
            (Opcode::Ldarg, Operand::Arg(0)),
            (Opcode::Call, Operand::Method(MethodRef {
                target: MethodTarget::Internal(TWICE),
                sig: twice_sig,
            })),
            (Opcode::LdcI4, Operand::Int32(1)),
            (Opcode::Add, Operand::None),
            (Opcode::Ret, Operand::None),
        ],
    ));
    module.types.push(helpers);

    module
}

/// Small integer inputs for `id`, kept low so `Sum` stays within the step limit.
pub fn inputs(module: &Module, id: MethodId) -> Vec<Vec<Value>> {
    let arity = module.method(id).map_or(0, |m| m.sig.params.len());
    if arity == 0 {
        return vec![vec![]];
    }
    [-7, -1, 0, 1, 2, 3, 25]
        .into_iter()
        .map(|x| vec![Value::I4(x); arity])
        .collect()
}

/// Asserts that every method in `ids` behaves identically in both modules on [`inputs`].
pub fn assert_equivalent(
    original: &Module,
    obfuscated: &Module,
    ids: &[MethodId],
    config: &VerificationConfig,
) {
    for &id in ids {
        let results =
            check_equivalence(original, obfuscated, id, &inputs(original, id), config).unwrap();
        assert!(
            results.overall_passed,
            "{} diverged: {:?}",
            original.qualified_name(id),
            results.mismatches
        );
    }
}

/// Body of `id`, which must exist.
pub fn body(module: &Module, id: MethodId) -> &MethodBody {
    module
        .method(id)
        .ok()
        .and_then(|m| m.body.as_ref())
        .unwrap_or_else(|| panic!("{} has no body", module.qualified_name(id)))
}
