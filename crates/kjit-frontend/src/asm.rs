//! Textual kernel assembly.
//!
//! A line-based format for writing bytecode methods in files and tests:
//!
//! ```text
//! .method ScalarAdd 1 (i32, view<global, i32>) -> void
//! .locals (i32)
//! loop:
//!   ldloc 0
//!   brtrue loop
//!   ret
//! ```
//!
//! Comments start with `;`. Branch operands are labels (or absolute
//! instruction indices); `call` accepts a method name or token.

use std::collections::HashMap;

use kjit_ir::{
    AddressSpace, AtomicOp, BarrierKind, BinaryOp, Dim3, MethodFlags, MethodHandle, PrimitiveKind,
    ShuffleMode, UnaryOp,
};

use crate::bytecode::{Instruction, Intrinsic, MethodBytecode, Program, TypeDesc};

/// Errors reported by the assembler.
#[derive(Debug, thiserror::Error)]
pub enum AsmError {
    /// A malformed line, with its 1-based line number.
    #[error("line {line}: {message}")]
    Syntax {
        /// 1-based source line.
        line: usize,
        /// What went wrong.
        message: String,
    },
}

fn err(line: usize, message: impl Into<String>) -> AsmError {
    AsmError::Syntax {
        line,
        message: message.into(),
    }
}

/// Assembles a program from source text.
pub fn assemble(source: &str) -> Result<Program, AsmError> {
    let mut methods: Vec<MethodBytecode> = Vec::new();
    let mut current: Option<MethodDraft> = None;
    let mut call_fixups: Vec<(usize, usize, String, usize)> = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(".method") {
            if let Some(draft) = current.take() {
                methods.push(draft.finish(&mut call_fixups, methods.len())?);
            }
            current = Some(MethodDraft::parse_header(rest.trim(), line_no)?);
            continue;
        }
        if let Some(rest) = line.strip_prefix(".locals") {
            let draft = current
                .as_mut()
                .ok_or_else(|| err(line_no, ".locals before .method"))?;
            let inner = rest
                .trim()
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| err(line_no, "expected .locals (types)"))?;
            draft.locals = parse_type_list(inner, line_no)?;
            continue;
        }

        let draft = current
            .as_mut()
            .ok_or_else(|| err(line_no, "instruction before .method"))?;
        let mut body = line;
        // `label:` prefix, optionally followed by an instruction.
        if let Some(colon) = line.find(':')
            && line[..colon].chars().all(|c| c.is_alphanumeric() || c == '_')
            && !line[..colon].is_empty()
        {
            draft
                .labels
                .insert(line[..colon].to_string(), draft.raw.len() as u32);
            body = line[colon + 1..].trim();
            if body.is_empty() {
                continue;
            }
        }
        draft.raw.push((line_no, body.to_string()));
    }
    if let Some(draft) = current.take() {
        methods.push(draft.finish(&mut call_fixups, methods.len())?);
    }

    // Resolve by-name calls now that every token is known.
    let names: HashMap<String, u32> = methods
        .iter()
        .map(|m| (m.handle.name.clone(), m.handle.token))
        .collect();
    for (method_idx, instr_idx, name, line_no) in call_fixups {
        let token = *names
            .get(&name)
            .ok_or_else(|| err(line_no, format!("call target '{name}' not found")))?;
        methods[method_idx].code[instr_idx] = Instruction::Call(token);
    }

    Ok(Program { methods })
}

struct MethodDraft {
    handle: MethodHandle,
    params: Vec<TypeDesc>,
    locals: Vec<TypeDesc>,
    ret: TypeDesc,
    flags: MethodFlags,
    labels: HashMap<String, u32>,
    raw: Vec<(usize, String)>,
}

impl MethodDraft {
    /// `<name> <token> (<params>) -> <ret> [flags]`
    fn parse_header(s: &str, line: usize) -> Result<Self, AsmError> {
        let open = s
            .find('(')
            .ok_or_else(|| err(line, "expected parameter list"))?;
        let close = s
            .rfind(')')
            .ok_or_else(|| err(line, "unterminated parameter list"))?;
        let mut head = s[..open].split_whitespace();
        let name = head
            .next()
            .ok_or_else(|| err(line, "expected method name"))?;
        let token: u32 = head
            .next()
            .ok_or_else(|| err(line, "expected method token"))?
            .parse()
            .map_err(|_| err(line, "method token must be an integer"))?;
        let params = parse_type_list(&s[open + 1..close], line)?;
        let tail = s[close + 1..].trim();
        let tail = tail
            .strip_prefix("->")
            .ok_or_else(|| err(line, "expected '-> <type>'"))?
            .trim();
        let mut parts = tail.splitn(2, char::is_whitespace);
        let ret = parse_type(
            parts.next().ok_or_else(|| err(line, "expected return type"))?,
            line,
        )?;
        let mut flags = MethodFlags::NONE;
        if let Some(flag_str) = parts.next() {
            for flag in flag_str.split_whitespace() {
                flags = flags
                    | match flag {
                        "no_inlining" => MethodFlags::NO_INLINING,
                        "aggressive_inlining" => MethodFlags::AGGRESSIVE_INLINING,
                        "external" => MethodFlags::EXTERNAL,
                        other => return Err(err(line, format!("unknown flag '{other}'"))),
                    };
            }
        }
        Ok(Self {
            handle: MethodHandle::new(token, name),
            params,
            locals: Vec::new(),
            ret,
            flags,
            labels: HashMap::new(),
            raw: Vec::new(),
        })
    }

    fn finish(
        self,
        call_fixups: &mut Vec<(usize, usize, String, usize)>,
        method_idx: usize,
    ) -> Result<MethodBytecode, AsmError> {
        let mut code = Vec::with_capacity(self.raw.len());
        for (i, (line, text)) in self.raw.iter().enumerate() {
            let instr = parse_instruction(text, *line, &self.labels, |name, line| {
                call_fixups.push((method_idx, i, name.to_string(), line));
                // Placeholder token, patched after all methods parse.
                Instruction::Call(u32::MAX)
            })?;
            code.push(instr);
        }
        Ok(MethodBytecode {
            handle: self.handle,
            params: self.params,
            locals: self.locals,
            ret: self.ret,
            flags: self.flags,
            code,
        })
    }
}

fn parse_type_list(s: &str, line: usize) -> Result<Vec<TypeDesc>, AsmError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    split_top(s)
        .into_iter()
        .map(|t| parse_type(t, line))
        .collect()
}

/// Splits on top-level commas, respecting `<>` and `{}` nesting.
fn split_top(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '<' | '{' => depth += 1,
            '>' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(s[start..].trim());
    out
}

fn parse_space(s: &str, line: usize) -> Result<AddressSpace, AsmError> {
    match s.trim() {
        "generic" => Ok(AddressSpace::Generic),
        "global" => Ok(AddressSpace::Global),
        "shared" => Ok(AddressSpace::Shared),
        "local" => Ok(AddressSpace::Local),
        "constant" => Ok(AddressSpace::Constant),
        other => Err(err(line, format!("unknown address space '{other}'"))),
    }
}

fn parse_prim(s: &str) -> Option<PrimitiveKind> {
    Some(match s {
        "i1" => PrimitiveKind::Int1,
        "i8" => PrimitiveKind::Int8,
        "i16" => PrimitiveKind::Int16,
        "i32" => PrimitiveKind::Int32,
        "i64" => PrimitiveKind::Int64,
        "f32" => PrimitiveKind::Float32,
        "f64" => PrimitiveKind::Float64,
        _ => return None,
    })
}

fn parse_type(s: &str, line: usize) -> Result<TypeDesc, AsmError> {
    let s = s.trim();
    if s == "void" {
        return Ok(TypeDesc::Void);
    }
    if let Some(prim) = parse_prim(s) {
        return Ok(TypeDesc::Prim(prim));
    }
    for (prefix, is_view) in [("ptr<", false), ("view<", true)] {
        if let Some(inner) = s.strip_prefix(prefix).and_then(|t| t.strip_suffix('>')) {
            let parts = split_top(inner);
            if parts.len() != 2 {
                return Err(err(line, format!("expected <space, type> in '{s}'")));
            }
            let space = parse_space(parts[0], line)?;
            let elem = Box::new(parse_type(parts[1], line)?);
            return Ok(if is_view {
                TypeDesc::View(elem, space)
            } else {
                TypeDesc::Ptr(elem, space)
            });
        }
    }
    if let Some(inner) = s.strip_prefix("struct{").and_then(|t| t.strip_suffix('}')) {
        return Ok(TypeDesc::Struct(parse_type_list(inner, line)?));
    }
    Err(err(line, format!("unknown type '{s}'")))
}

fn parse_target(s: &str, line: usize, labels: &HashMap<String, u32>) -> Result<u32, AsmError> {
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    labels
        .get(s)
        .copied()
        .ok_or_else(|| err(line, format!("unknown label '{s}'")))
}

fn parse_dim(s: &str, line: usize) -> Result<Dim3, AsmError> {
    match s {
        "x" => Ok(Dim3::X),
        "y" => Ok(Dim3::Y),
        "z" => Ok(Dim3::Z),
        other => Err(err(line, format!("unknown dimension '{other}'"))),
    }
}

fn parse_instruction(
    text: &str,
    line: usize,
    labels: &HashMap<String, u32>,
    mut on_named_call: impl FnMut(&str, usize) -> Instruction,
) -> Result<Instruction, AsmError> {
    let (mnemonic, operand) = match text.split_once(char::is_whitespace) {
        Some((m, rest)) => (m, rest.trim()),
        None => (text, ""),
    };
    let int_operand = |what: &str| -> Result<i64, AsmError> {
        operand
            .parse::<i64>()
            .map_err(|_| err(line, format!("{mnemonic} expects {what}")))
    };
    let index_operand = || -> Result<u16, AsmError> {
        operand
            .parse::<u16>()
            .map_err(|_| err(line, format!("{mnemonic} expects an index")))
    };
    let field_operand = || -> Result<u32, AsmError> {
        operand
            .parse::<u32>()
            .map_err(|_| err(line, format!("{mnemonic} expects a field index")))
    };

    let instr = match mnemonic {
        "nop" => Instruction::Nop,
        "dup" => Instruction::Dup,
        "pop" => Instruction::Pop,
        "ldarg" => Instruction::LdArg(index_operand()?),
        "ldloc" => Instruction::LdLoc(index_operand()?),
        "stloc" => Instruction::StLoc(index_operand()?),
        "ldloca" => Instruction::LdLocA(index_operand()?),
        "ldc.i4" => Instruction::LdcI32(int_operand("an i32 literal")? as i32),
        "ldc.i8" => Instruction::LdcI64(int_operand("an i64 literal")?),
        "ldc.r4" => Instruction::LdcF32(
            operand
                .parse::<f32>()
                .map_err(|_| err(line, "ldc.r4 expects an f32 literal"))?,
        ),
        "ldc.r8" => Instruction::LdcF64(
            operand
                .parse::<f64>()
                .map_err(|_| err(line, "ldc.r8 expects an f64 literal"))?,
        ),
        "ldnull" => Instruction::LdNull(parse_type(operand, line)?),
        "ldstr" => {
            let s = operand
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .ok_or_else(|| err(line, "ldstr expects a quoted string"))?;
            Instruction::LdStr(s.to_string())
        }
        "add" => Instruction::Add,
        "sub" => Instruction::Sub,
        "mul" => Instruction::Mul,
        "div" => Instruction::Div,
        "div.un" => Instruction::DivUn,
        "rem" => Instruction::Rem,
        "rem.un" => Instruction::RemUn,
        "and" => Instruction::And,
        "or" => Instruction::Or,
        "xor" => Instruction::Xor,
        "shl" => Instruction::Shl,
        "shr" => Instruction::Shr,
        "shr.un" => Instruction::ShrUn,
        "min" => Instruction::Min,
        "max" => Instruction::Max,
        "neg" => Instruction::Neg,
        "not" => Instruction::Not,
        "ceq" => Instruction::Ceq,
        "cne" => Instruction::Cne,
        "clt" => Instruction::Clt,
        "clt.un" => Instruction::CltUn,
        "cle" => Instruction::Cle,
        "cle.un" => Instruction::CleUn,
        "cgt" => Instruction::Cgt,
        "cgt.un" => Instruction::CgtUn,
        "cge" => Instruction::Cge,
        "cge.un" => Instruction::CgeUn,
        "br" => Instruction::Br(parse_target(operand, line, labels)?),
        "brtrue" => Instruction::BrTrue(parse_target(operand, line, labels)?),
        "brfalse" => Instruction::BrFalse(parse_target(operand, line, labels)?),
        "switch" => {
            let targets = split_top(operand)
                .into_iter()
                .map(|t| parse_target(t, line, labels))
                .collect::<Result<Vec<_>, _>>()?;
            Instruction::Switch(targets)
        }
        "ret" => Instruction::Ret,
        "call" => match operand.parse::<u32>() {
            Ok(token) => Instruction::Call(token),
            Err(_) => on_named_call(operand, line),
        },
        "ldelem" => Instruction::LdElem,
        "stelem" => Instruction::StElem,
        "ldelema" => Instruction::LdElemA,
        "ldlen" => Instruction::LdLen,
        "ldfld" => Instruction::LdFld(field_operand()?),
        "stfld" => Instruction::StFld(field_operand()?),
        "ldflda" => Instruction::LdFldA(field_operand()?),
        "sizeof" => Instruction::SizeOf(parse_type(operand, line)?),
        "laneindex" => Instruction::Intrinsic(Intrinsic::LaneIndex),
        "warpsize" => Instruction::Intrinsic(Intrinsic::WarpSize),
        "barrier" => Instruction::Intrinsic(Intrinsic::GroupBarrier),
        "atomic.cas" => Instruction::Intrinsic(Intrinsic::AtomicCas),
        _ => {
            if let Some(suffix) = mnemonic.strip_prefix("conv.un.") {
                let prim = parse_prim(suffix)
                    .ok_or_else(|| err(line, format!("unknown conversion '{mnemonic}'")))?;
                Instruction::ConvUn(prim)
            } else if let Some(suffix) = mnemonic.strip_prefix("conv.") {
                let prim = parse_prim(suffix)
                    .ok_or_else(|| err(line, format!("unknown conversion '{mnemonic}'")))?;
                Instruction::Conv(prim)
            } else if let Some(suffix) = mnemonic.strip_prefix("gridindex.") {
                Instruction::Intrinsic(Intrinsic::GridIndex(parse_dim(suffix, line)?))
            } else if let Some(suffix) = mnemonic.strip_prefix("griddim.") {
                Instruction::Intrinsic(Intrinsic::GridDim(parse_dim(suffix, line)?))
            } else if let Some(suffix) = mnemonic.strip_prefix("groupindex.") {
                Instruction::Intrinsic(Intrinsic::GroupIndex(parse_dim(suffix, line)?))
            } else if let Some(suffix) = mnemonic.strip_prefix("groupdim.") {
                Instruction::Intrinsic(Intrinsic::GroupDim(parse_dim(suffix, line)?))
            } else if let Some(suffix) = mnemonic.strip_prefix("membar.") {
                let kind = match suffix {
                    "group" => BarrierKind::Group,
                    "device" => BarrierKind::Device,
                    "system" => BarrierKind::System,
                    other => return Err(err(line, format!("unknown barrier '{other}'"))),
                };
                Instruction::Intrinsic(Intrinsic::MemBarrier(kind))
            } else if let Some(suffix) = mnemonic.strip_prefix("shuffle.") {
                let mode = match suffix {
                    "idx" => ShuffleMode::Idx,
                    "up" => ShuffleMode::Up,
                    "down" => ShuffleMode::Down,
                    "xor" => ShuffleMode::Xor,
                    other => return Err(err(line, format!("unknown shuffle mode '{other}'"))),
                };
                let width = operand
                    .parse::<u32>()
                    .map_err(|_| err(line, "shuffle expects a width"))?;
                Instruction::Intrinsic(Intrinsic::Shuffle(mode, width))
            } else if let Some(suffix) = mnemonic.strip_prefix("atomic.") {
                let op = match suffix {
                    "add" => AtomicOp::Add,
                    "and" => AtomicOp::And,
                    "or" => AtomicOp::Or,
                    "xor" => AtomicOp::Xor,
                    "min" => AtomicOp::Min,
                    "max" => AtomicOp::Max,
                    "xchg" => AtomicOp::Exchange,
                    other => return Err(err(line, format!("unknown atomic '{other}'"))),
                };
                Instruction::Intrinsic(Intrinsic::Atomic(op))
            } else if let Some(suffix) = mnemonic.strip_prefix("math.") {
                match suffix {
                    "pow" => Instruction::Intrinsic(Intrinsic::MathBinary(BinaryOp::Pow)),
                    "atan2" => Instruction::Intrinsic(Intrinsic::MathBinary(BinaryOp::Atan2)),
                    "min" => Instruction::Intrinsic(Intrinsic::MathBinary(BinaryOp::Min)),
                    "max" => Instruction::Intrinsic(Intrinsic::MathBinary(BinaryOp::Max)),
                    _ => {
                        let op = match suffix {
                            "abs" => UnaryOp::Abs,
                            "ceil" => UnaryOp::Ceiling,
                            "floor" => UnaryOp::Floor,
                            "sin" => UnaryOp::Sin,
                            "cos" => UnaryOp::Cos,
                            "tanh" => UnaryOp::Tanh,
                            "exp" => UnaryOp::Exp,
                            "exp2" => UnaryOp::Exp2,
                            "log" => UnaryOp::Log,
                            "log2" => UnaryOp::Log2,
                            "sqrt" => UnaryOp::Sqrt,
                            "rsqrt" => UnaryOp::Rsqrt,
                            other => {
                                return Err(err(
                                    line,
                                    format!("unknown math function '{other}'"),
                                ));
                            }
                        };
                        Instruction::Intrinsic(Intrinsic::MathUnary(op))
                    }
                }
            } else {
                return Err(err(line, format!("unknown instruction '{mnemonic}'")));
            }
        }
    };
    Ok(instr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_scalar_add() {
        let source = r#"
; c[idx] = a[idx] + b[idx]
.method ScalarAdd 1 (i32, view<global, i32>, view<global, i32>, view<global, i32>) -> void
  ldarg 3
  ldarg 0
  ldarg 1
  ldarg 0
  ldelem
  ldarg 2
  ldarg 0
  ldelem
  add
  stelem
  ret
"#;
        let program = assemble(source).unwrap();
        assert_eq!(program.methods.len(), 1);
        let m = &program.methods[0];
        assert_eq!(m.handle.name, "ScalarAdd");
        assert_eq!(m.params.len(), 4);
        assert_eq!(m.code.len(), 11);
        assert_eq!(m.code[4], Instruction::LdElem);
    }

    #[test]
    fn labels_resolve_to_instruction_indices() {
        let source = r#"
.method Loop 1 (i32) -> void
.locals (i32)
top:
  ldloc 0
  brtrue top
  ret
"#;
        let program = assemble(source).unwrap();
        let m = &program.methods[0];
        assert_eq!(m.code[1], Instruction::BrTrue(0));
        assert_eq!(m.locals.len(), 1);
    }

    #[test]
    fn named_calls_are_fixed_up_across_methods() {
        let source = r#"
.method Caller 1 (i32) -> i32
  ldarg 0
  call Inc
  ret

.method Inc 2 (i32) -> i32 aggressive_inlining
  ldarg 0
  ldc.i4 1
  add
  ret
"#;
        let program = assemble(source).unwrap();
        assert_eq!(program.methods[0].code[1], Instruction::Call(2));
        assert!(program.methods[1]
            .flags
            .contains(MethodFlags::AGGRESSIVE_INLINING));
    }

    #[test]
    fn nested_types_parse() {
        let source = r#"
.method S 1 (ptr<shared, struct{i32, f64}>, view<global, f32>) -> void
  ret
"#;
        let program = assemble(source).unwrap();
        let params = &program.methods[0].params;
        assert_eq!(
            params[0],
            TypeDesc::Ptr(
                Box::new(TypeDesc::Struct(vec![
                    TypeDesc::Prim(PrimitiveKind::Int32),
                    TypeDesc::Prim(PrimitiveKind::Float64),
                ])),
                AddressSpace::Shared
            )
        );
        assert_eq!(
            params[1],
            TypeDesc::View(
                Box::new(TypeDesc::Prim(PrimitiveKind::Float32)),
                AddressSpace::Global
            )
        );
    }

    #[test]
    fn unknown_mnemonic_names_its_line() {
        let source = ".method M 1 () -> void\n  frobnicate\n  ret\n";
        let e = assemble(source).unwrap_err();
        let AsmError::Syntax { line, message } = e;
        assert_eq!(line, 2);
        assert!(message.contains("frobnicate"));
    }

    #[test]
    fn intrinsics_parse() {
        let source = r#"
.method K 1 (view<global, f32>) -> void
  gridindex.x
  pop
  shuffle.down 16
  barrier
  ret
"#;
        // shuffle pops two operands; this is not stack-valid, but the
        // assembler only checks syntax.
        let program = assemble(source).unwrap();
        let code = &program.methods[0].code;
        assert_eq!(
            code[0],
            Instruction::Intrinsic(Intrinsic::GridIndex(Dim3::X))
        );
        assert_eq!(
            code[2],
            Instruction::Intrinsic(Intrinsic::Shuffle(ShuffleMode::Down, 16))
        );
        assert_eq!(code[3], Instruction::Intrinsic(Intrinsic::GroupBarrier));
    }
}
