use super::bytecode::{Code, CompileCtx, Instruction as I};
use std::fmt::{self, Write};

pub fn disassemble_to_string(name: &str, code: &Code, ctx: &CompileCtx) -> String {
    let mut output = String::new();
    let _ = disassemble(name, code, ctx, &mut output);
    output
}

pub fn disassemble(name: &str, code: &Code, ctx: &CompileCtx, w: &mut impl Write) -> fmt::Result {
    writeln!(w, "{} ({} instructions):", name, code.len())?;
    for (i, ins) in code.ins.iter().enumerate() {
        write!(w, "  {:4}: ", i)?;
        disassemble_instruction(*ins, code, ctx, w)?;
        writeln!(w)?;
    }
    Ok(())
}

fn disassemble_instruction(
    ins: I,
    code: &Code,
    ctx: &CompileCtx,
    w: &mut impl Write,
) -> fmt::Result {
    let ins_name = ins.to_string();
    match ins {
        I::IConst(idx) => write!(w, "{} {} ({})", ins_name, idx, ctx.ints.get(idx)),
        I::FConst(idx) => write!(w, "{} {} ({})", ins_name, idx, ctx.floats.get(idx)),
        I::SConst(idx) => write!(w, "{} {} (\"{}\")", ins_name, idx, ctx.strings.get(idx)),

        I::Load(slot) => write!(w, "{} {}", ins_name, slot),
        I::Store(slot) => write!(w, "{} {}", ins_name, slot),
        I::CLoad(slot) => write!(w, "{} {}", ins_name, slot),
        I::CStore(slot) => write!(w, "{} {}", ins_name, slot),
        I::GLoad(idx) => write!(w, "{} {} (\"{}\")", ins_name, idx, code.name(idx)),
        I::GStore(idx) => write!(w, "{} {} (\"{}\")", ins_name, idx, code.name(idx)),

        I::Br(target) => write!(w, "{} {}", ins_name, target),
        I::Brt(target) => write!(w, "{} {}", ins_name, target),
        I::Brf(target) => write!(w, "{} {}", ins_name, target),

        I::Call(argc) => write!(w, "{} (argc={})", ins_name, argc),
        I::ArrayGen(count) => write!(w, "{} (count={})", ins_name, count),
        I::Closure(idx) => write!(w, "{} {}", ins_name, idx),

        // no operand
        _ => write!(w, "{}", ins_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::bytecode::Instruction;

    #[test]
    fn test_disassemble_resolves_operands() {
        let mut ctx = CompileCtx::new();
        let mut code = Code::new();
        let i = ctx.ints.intern(42);
        code.emit(Instruction::IConst(i));
        let n = code.name_index("print");
        code.emit(Instruction::GLoad(n));
        code.emit(Instruction::Call(1));

        let text = disassemble_to_string("<unit>", &code, &ctx);
        assert!(text.contains("(42)"));
        assert!(text.contains("(\"print\")"));
        assert!(text.contains("argc=1"));
    }
}
