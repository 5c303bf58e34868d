//! Reference interpreter for the instruction model.
//!
//! Executes a method of a [`Module`] frame by frame over a value stack. Internal calls recurse,
//! external calls go through the [`Host`]. Catch handlers are honoured; finally, fault and
//! filter clauses are reported as unsupported rather than approximated.

use crate::config::VerificationConfig;
use crate::host::Host;
use crate::ExecError;
use serde::{Deserialize, Serialize};
use shade_core::{
    HandlerKind, InstrId, Instruction, MethodBody, MethodId, MethodTarget, Module, Opcode,
    Operand, TypeSig, WellKnown,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Exception raised by integer division by zero.
pub const DIVIDE_BY_ZERO: &str = "System.DivideByZeroException";

/// Exception raised by `throw` on a null reference.
pub const NULL_REFERENCE: &str = "System.NullReferenceException";

/// Runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    /// 32-bit integers and booleans.
    I4(i32),
    I8(i64),
    /// Floating point, both widths.
    R8(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// The UTF-8 encoding object.
    Encoding,
}

impl Value {
    /// Zero value of a local of type `ty`.
    pub fn default_for(ty: &TypeSig) -> Self {
        match ty {
            TypeSig::Bool | TypeSig::I4 => Self::I4(0),
            TypeSig::I8 => Self::I8(0),
            TypeSig::R4 | TypeSig::R8 => Self::R8(0.0),
            _ => Self::Null,
        }
    }

    /// Truth value used by `brtrue`/`brfalse`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::I4(v) => *v != 0,
            Self::I8(v) => *v != 0,
            Self::R8(v) => *v != 0.0,
            Self::Str(_) | Self::Bytes(_) | Self::Encoding => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::I4(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::R8(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Bytes(_) => f.write_str("System.Byte[]"),
            Self::Encoding => f.write_str("System.Text.UTF8Encoding"),
        }
    }
}

/// How a method invocation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// Normal return, with the value for non-void methods.
    Returned(Option<Value>),
    /// The process exited with this code.
    Exited(i32),
    /// An exception escaped the method.
    Threw(Value),
}

enum Step {
    Next,
    Jump(InstrId),
    Done(Outcome),
    Throw(Value),
}

struct Frame {
    args: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl Frame {
    fn pop(&mut self, instr: &Instruction) -> Result<Value, ExecError> {
        self.stack
            .pop()
            .ok_or(ExecError::StackUnderflow(instr.id.0))
    }

    fn pop_n(&mut self, n: usize, instr: &Instruction) -> Result<Vec<Value>, ExecError> {
        if self.stack.len() < n {
            return Err(ExecError::StackUnderflow(instr.id.0));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_pair(&mut self, instr: &Instruction) -> Result<(Value, Value), ExecError> {
        let b = self.pop(instr)?;
        let a = self.pop(instr)?;
        Ok((a, b))
    }
}

/// Interpreter over one module.
pub struct Interpreter<'m> {
    module: &'m Module,
    host: Host,
    step_limit: u64,
    max_call_depth: usize,
    steps: u64,
    statics: HashMap<(String, String), Value>,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module, config: &VerificationConfig) -> Self {
        Self {
            module,
            host: Host::new(config.debugger_attached),
            step_limit: config.step_limit,
            max_call_depth: config.max_call_depth,
            steps: 0,
            statics: HashMap::new(),
        }
    }

    pub const fn host(&self) -> &Host {
        &self.host
    }

    pub fn into_host(self) -> Host {
        self.host
    }

    /// Instructions executed so far.
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Invokes method `id` with `args` (receiver first for instance methods).
    pub fn run(&mut self, id: MethodId, args: Vec<Value>) -> Result<Outcome, ExecError> {
        let method = self.module.method(id)?;
        let expected = method.sig.params.len() + usize::from(method.sig.has_this);
        if args.len() != expected {
            return Err(ExecError::Arity {
                method: self.module.qualified_name(id),
                expected,
                found: args.len(),
            });
        }
        self.invoke(id, args, 0)
    }

    fn invoke(&mut self, id: MethodId, args: Vec<Value>, depth: usize) -> Result<Outcome, ExecError> {
        if depth > self.max_call_depth {
            return Err(ExecError::CallDepth(self.max_call_depth));
        }
        let module = self.module;
        let method = module.method(id)?;
        let body = method
            .body
            .as_ref()
            .filter(|b| !b.instructions.is_empty())
            .ok_or_else(|| ExecError::NoBody(module.qualified_name(id)))?;
        if let Some(handler) = body.handlers.iter().find(|h| h.kind != HandlerKind::Catch) {
            return Err(ExecError::Unsupported(format!("{:?} handler", handler.kind)));
        }

        let positions = body.positions();
        let mut frame = Frame {
            args,
            locals: body.locals.iter().map(|l| Value::default_for(&l.ty)).collect(),
            stack: Vec::new(),
        };
        let returns_void = method.returns_void();

        let mut pc = 0;
        loop {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(ExecError::StepLimit(self.step_limit));
            }
            let instr = body
                .instructions
                .get(pc)
                .ok_or_else(|| ExecError::FellOffEnd(module.qualified_name(id)))?;

            match self.step(instr, &mut frame, returns_void, depth)? {
                Step::Next => pc += 1,
                Step::Jump(target) => {
                    pc = *positions
                        .get(&target)
                        .ok_or(ExecError::DanglingTarget(target.0))?;
                }
                Step::Done(outcome) => return Ok(outcome),
                Step::Throw(exception) => match catch_handler(body, &positions, pc)? {
                    Some(handler) => {
                        frame.stack.clear();
                        frame.stack.push(exception);
                        pc = handler;
                    }
                    None => return Ok(Outcome::Threw(exception)),
                },
            }
        }
    }

    fn step(
        &mut self,
        instr: &Instruction,
        frame: &mut Frame,
        returns_void: bool,
        depth: usize,
    ) -> Result<Step, ExecError> {
        let mismatch = || ExecError::TypeMismatch {
            opcode: instr.opcode.to_string(),
            id: instr.id.0,
        };

        match (&instr.opcode, &instr.operand) {
            (Opcode::Nop | Opcode::Break, _) => {}
            (Opcode::Ldarg, Operand::Arg(slot)) => {
                let value = frame
                    .args
                    .get(usize::from(*slot))
                    .cloned()
                    .ok_or(ExecError::ArgOutOfRange(*slot))?;
                frame.stack.push(value);
            }
            (Opcode::Starg, Operand::Arg(slot)) => {
                let value = frame.pop(instr)?;
                *frame
                    .args
                    .get_mut(usize::from(*slot))
                    .ok_or(ExecError::ArgOutOfRange(*slot))? = value;
            }
            (Opcode::Ldloc, Operand::Local(slot)) => {
                let value = frame
                    .locals
                    .get(usize::from(*slot))
                    .cloned()
                    .ok_or(ExecError::LocalOutOfRange(*slot))?;
                frame.stack.push(value);
            }
            (Opcode::Stloc, Operand::Local(slot)) => {
                let value = frame.pop(instr)?;
                *frame
                    .locals
                    .get_mut(usize::from(*slot))
                    .ok_or(ExecError::LocalOutOfRange(*slot))? = value;
            }
            (Opcode::LdcI4, Operand::Int32(v)) => frame.stack.push(Value::I4(*v)),
            (Opcode::LdcI8, Operand::Int64(v)) => frame.stack.push(Value::I8(*v)),
            (Opcode::LdcR4, Operand::Float32(v)) => frame.stack.push(Value::R8(f64::from(*v))),
            (Opcode::LdcR8, Operand::Float64(v)) => frame.stack.push(Value::R8(*v)),
            (Opcode::Ldstr, Operand::String(s)) => frame.stack.push(Value::Str(s.clone())),
            (Opcode::Ldnull, _) => frame.stack.push(Value::Null),
            (Opcode::Dup, _) => {
                let value = frame.pop(instr)?;
                frame.stack.push(value.clone());
                frame.stack.push(value);
            }
            (Opcode::Pop, _) => {
                frame.pop(instr)?;
            }
            (
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Rem
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr,
                _,
            ) => {
                let (a, b) = frame.pop_pair(instr)?;
                match binary(instr.opcode, &a, &b).ok_or_else(mismatch)? {
                    Some(value) => frame.stack.push(value),
                    None => return Ok(Step::Throw(Value::Str(DIVIDE_BY_ZERO.into()))),
                }
            }
            (Opcode::Neg | Opcode::Not, _) => {
                let value = match (instr.opcode, frame.pop(instr)?) {
                    (Opcode::Neg, Value::I4(v)) => Value::I4(v.wrapping_neg()),
                    (Opcode::Neg, Value::I8(v)) => Value::I8(v.wrapping_neg()),
                    (Opcode::Neg, Value::R8(v)) => Value::R8(-v),
                    (Opcode::Not, Value::I4(v)) => Value::I4(!v),
                    (Opcode::Not, Value::I8(v)) => Value::I8(!v),
                    _ => return Err(mismatch()),
                };
                frame.stack.push(value);
            }
            (Opcode::Ceq | Opcode::Cgt | Opcode::Clt, _) => {
                let (a, b) = frame.pop_pair(instr)?;
                let wanted = match instr.opcode {
                    Opcode::Ceq => Ordering::Equal,
                    Opcode::Cgt => Ordering::Greater,
                    _ => Ordering::Less,
                };
                frame
                    .stack
                    .push(Value::I4(i32::from(compare(&a, &b) == Some(wanted))));
            }
            (Opcode::ConvI4 | Opcode::ConvI8 | Opcode::ConvR8, _) => {
                let value = convert(instr.opcode, frame.pop(instr)?).ok_or_else(mismatch)?;
                frame.stack.push(value);
            }
            (Opcode::Br | Opcode::Leave, Operand::Target(target)) => {
                if instr.opcode == Opcode::Leave {
                    frame.stack.clear();
                }
                return Ok(Step::Jump(*target));
            }
            (Opcode::Brtrue | Opcode::Brfalse, Operand::Target(target)) => {
                let taken = frame.pop(instr)?.is_truthy() == (instr.opcode == Opcode::Brtrue);
                if taken {
                    return Ok(Step::Jump(*target));
                }
            }
            (
                Opcode::Beq | Opcode::Bne | Opcode::Bge | Opcode::Bgt | Opcode::Ble | Opcode::Blt,
                Operand::Target(target),
            ) => {
                let (a, b) = frame.pop_pair(instr)?;
                let order = compare(&a, &b);
                let taken = match instr.opcode {
                    Opcode::Beq => order == Some(Ordering::Equal),
                    Opcode::Bne => order != Some(Ordering::Equal),
                    Opcode::Bge => matches!(order, Some(Ordering::Greater | Ordering::Equal)),
                    Opcode::Bgt => order == Some(Ordering::Greater),
                    Opcode::Ble => matches!(order, Some(Ordering::Less | Ordering::Equal)),
                    _ => order == Some(Ordering::Less),
                };
                if taken {
                    return Ok(Step::Jump(*target));
                }
            }
            (Opcode::Switch, Operand::Switch(targets)) => {
                let Value::I4(index) = frame.pop(instr)? else {
                    return Err(mismatch());
                };
                if let Some(target) = usize::try_from(index).ok().and_then(|i| targets.get(i)) {
                    return Ok(Step::Jump(*target));
                }
            }
            (Opcode::Call | Opcode::Callvirt, Operand::Method(callee)) => {
                let argc = callee.sig.params.len() + usize::from(callee.sig.has_this);
                let args = frame.pop_n(argc, instr)?;
                let outcome = match callee.target {
                    MethodTarget::Internal(id) => self.invoke(id, args, depth + 1)?,
                    MethodTarget::External(ext) => {
                        let external = self
                            .module
                            .external(ext)
                            .ok_or_else(|| ExecError::UnknownExternal(format!("import #{}", ext.0)))?;
                        let known = WellKnown::identify(external).ok_or_else(|| {
                            ExecError::UnknownExternal(format!(
                                "{}::{}",
                                external.declaring_type, external.name
                            ))
                        })?;
                        self.host.call(known, args)?
                    }
                };
                match outcome {
                    Outcome::Returned(value) => {
                        if !callee.sig.returns_void() {
                            frame.stack.push(value.ok_or_else(mismatch)?);
                        }
                    }
                    Outcome::Exited(code) => return Ok(Step::Done(Outcome::Exited(code))),
                    Outcome::Threw(exception) => return Ok(Step::Throw(exception)),
                }
            }
            (Opcode::Ret, _) => {
                let value = if returns_void {
                    None
                } else {
                    Some(frame.pop(instr)?)
                };
                return Ok(Step::Done(Outcome::Returned(value)));
            }
            (Opcode::Throw, _) => {
                let exception = match frame.pop(instr)? {
                    Value::Null => Value::Str(NULL_REFERENCE.into()),
                    other => other,
                };
                return Ok(Step::Throw(exception));
            }
            (Opcode::Ldsfld, Operand::Field(field)) => {
                let key = (field.declaring_type.clone(), field.name.clone());
                let value = self
                    .statics
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| Value::default_for(&field.ty));
                frame.stack.push(value);
            }
            (Opcode::Stsfld, Operand::Field(field)) => {
                let value = frame.pop(instr)?;
                self.statics
                    .insert((field.declaring_type.clone(), field.name.clone()), value);
            }
            (Opcode::Box | Opcode::Unbox, _) => {}
            (opcode, _) => return Err(ExecError::Unsupported(opcode.to_string())),
        }
        Ok(Step::Next)
    }
}

/// Position of the first catch handler whose try region covers `pc`.
fn catch_handler(
    body: &MethodBody,
    positions: &HashMap<InstrId, usize>,
    pc: usize,
) -> Result<Option<usize>, ExecError> {
    let position = |id: InstrId| {
        positions
            .get(&id)
            .copied()
            .ok_or(ExecError::DanglingTarget(id.0))
    };
    for handler in &body.handlers {
        let start = position(handler.try_start)?;
        let end = match handler.try_end {
            Some(id) => position(id)?,
            None => body.instructions.len(),
        };
        if (start..end).contains(&pc) {
            return position(handler.handler_start).map(Some);
        }
    }
    Ok(None)
}

/// Binary arithmetic. `None` for operand types the opcode does not accept; `Some(None)` for
/// integer division by zero.
fn binary(op: Opcode, a: &Value, b: &Value) -> Option<Option<Value>> {
    macro_rules! integer {
        ($variant:ident, $x:expr, $y:expr) => {{
            let (x, y) = ($x, $y);
            Some(match op {
                Opcode::Add => Some(Value::$variant(x.wrapping_add(y))),
                Opcode::Sub => Some(Value::$variant(x.wrapping_sub(y))),
                Opcode::Mul => Some(Value::$variant(x.wrapping_mul(y))),
                Opcode::Div if y == 0 => None,
                Opcode::Div => Some(Value::$variant(x.wrapping_div(y))),
                Opcode::Rem if y == 0 => None,
                Opcode::Rem => Some(Value::$variant(x.wrapping_rem(y))),
                Opcode::And => Some(Value::$variant(x & y)),
                Opcode::Or => Some(Value::$variant(x | y)),
                Opcode::Xor => Some(Value::$variant(x ^ y)),
                Opcode::Shl => Some(Value::$variant(x.wrapping_shl(y as u32))),
                Opcode::Shr => Some(Value::$variant(x.wrapping_shr(y as u32))),
                _ => return None,
            })
        }};
    }

    match (a, b) {
        (Value::I4(x), Value::I4(y)) => integer!(I4, *x, *y),
        (Value::I8(x), Value::I8(y)) => integer!(I8, *x, *y),
        (Value::I8(x), Value::I4(y)) if matches!(op, Opcode::Shl | Opcode::Shr) => {
            integer!(I8, *x, i64::from(*y))
        }
        (Value::R8(x), Value::R8(y)) => {
            let (x, y) = (*x, *y);
            let value = match op {
                Opcode::Add => x + y,
                Opcode::Sub => x - y,
                Opcode::Mul => x * y,
                Opcode::Div => x / y,
                Opcode::Rem => x % y,
                _ => return None,
            };
            Some(Some(Value::R8(value)))
        }
        _ => None,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::I4(x), Value::I4(y)) => Some(x.cmp(y)),
        (Value::I8(x), Value::I8(y)) => Some(x.cmp(y)),
        (Value::R8(x), Value::R8(y)) => x.partial_cmp(y),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn convert(op: Opcode, value: Value) -> Option<Value> {
    Some(match (op, value) {
        (Opcode::ConvI4, Value::I4(v)) => Value::I4(v),
        (Opcode::ConvI4, Value::I8(v)) => Value::I4(v as i32),
        (Opcode::ConvI4, Value::R8(v)) => Value::I4(v as i32),
        (Opcode::ConvI8, Value::I4(v)) => Value::I8(i64::from(v)),
        (Opcode::ConvI8, Value::I8(v)) => Value::I8(v),
        (Opcode::ConvI8, Value::R8(v)) => Value::I8(v as i64),
        (Opcode::ConvR8, Value::I4(v)) => Value::R8(f64::from(v)),
        (Opcode::ConvR8, Value::I8(v)) => Value::R8(v as f64),
        (Opcode::ConvR8, Value::R8(v)) => Value::R8(v),
        _ => return None,
    })
}
