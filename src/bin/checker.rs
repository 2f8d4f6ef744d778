//! `lotusflow-check`: the checker CLI (spec §6).
//!
//! ```text
//! lotusflow-check <ir-file> --vuln-type=<nullpointer|useafterfree|uninitialized|freenonheap|stackaddress>
//!     [--ctx] [--use-npa] [--json-output=<path>] [--min-score=<int>]
//! ```
//!
//! `<ir-file>` is parsed as a tiny line-oriented textual IR, documented
//! below since the distilled spec only says "IR file" without naming a
//! concrete on-disk form. One function per `function ... endfunction`
//! block; one basic block per `block` line; one instruction per line inside
//! a block, `<id> = <op> <operands...>`. A value is written `%N` for an
//! instruction result, `argN` for the current function's Nth parameter, or
//! `@N` for a global. Comments start with `#` and blank lines are ignored.
//!
//! ```text
//! global 0 none
//! function f 1 1 1
//! block 0 succs=
//! 0 = alloca
//! 1 = null
//! 2 = store %0 %1
//! 3 = load %0
//! return 3
//! endfunction
//! ```

use clap::Parser;
use lotusflow::config::AnalysisConfig;
use lotusflow::errors::{LotusFlowError, Result};
use lotusflow::ir::{BasicBlock, BlockId, CallInfo, CallKind, CallTarget, Function, FunctionId, GlobalId, GlobalInit, InstId, Instruction, Module, Opcode, ValueId};
use lotusflow::{Session, VulnType};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "lotusflow-check")]
struct Cli {
    ir_file: PathBuf,

    #[arg(long = "vuln-type")]
    vuln_type: String,

    #[arg(long = "ctx", default_value_t = false)]
    ctx: bool,

    #[arg(long = "use-npa", default_value_t = false)]
    use_npa: bool,

    #[arg(long = "json-output")]
    json_output: Option<PathBuf>,

    #[arg(long = "min-score", default_value_t = 0)]
    min_score: i32,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(err) => {
            eprintln!("lotusflow-check: {err}");
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let vuln_type = VulnType::from_str(&cli.vuln_type)?;
    let module = parse_module(&cli.ir_file)?;

    let mut config = AnalysisConfig::default();
    config.context_sensitive = cli.ctx;

    let mut session = Session::open(config)?;
    info!("analyzing {} function(s)", module.function_order.len());
    let analysis = session.analyze(&module);
    if analysis.conservative {
        warn!("analysis result is conservative (a budget cap or round limit was hit)");
    }
    session.run_checker(&module, &analysis, vuln_type, cli.use_npa);

    if let Some(path) = &cli.json_output {
        let file = fs::File::create(path).map_err(|e| LotusFlowError::input(format!("cannot write {}: {e}", path.display())))?;
        session.bug_reports().generate_json_report(file, cli.min_score).map_err(|e| LotusFlowError::input(e.to_string()))?;
    } else {
        let mut out = String::new();
        session.bug_reports().print_summary(&mut out).map_err(|e| LotusFlowError::input(e.to_string()))?;
        print!("{out}");
    }

    Ok(if session.bug_reports().has_passing_report(cli.min_score) { 1 } else { 0 })
}

// --- textual IR parser -----------------------------------------------------

fn parse_module(path: &std::path::Path) -> Result<Module> {
    let text = fs::read_to_string(path).map_err(|e| LotusFlowError::input(format!("cannot read {}: {e}", path.display())))?;

    let mut module = Module::default();
    let mut lines = text.lines().enumerate().peekable();

    while let Some((lineno, raw)) = lines.next() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("global ") {
            parse_global(rest, &mut module, lineno)?;
        } else if let Some(rest) = line.strip_prefix("function ") {
            let id = FunctionId(module.function_order.len() as u32);
            let func = parse_function(rest, id, &mut lines, lineno)?;
            module.function_order.push(func.id);
            module.functions.insert(func.id, func);
        } else {
            return Err(LotusFlowError::input(format!("line {}: expected 'global' or 'function', got '{line}'", lineno + 1)));
        }
    }

    Ok(module)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn parse_global(rest: &str, module: &mut Module, lineno: usize) -> Result<()> {
    let mut parts = rest.split_whitespace();
    let id: u32 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| bad_line(lineno))?;
    let kind = parts.next().ok_or_else(|| bad_line(lineno))?;
    let init = if kind == "none" {
        GlobalInit::None
    } else if let Some(fid) = kind.strip_prefix("func:") {
        GlobalInit::PointsToFunction(FunctionId(fid.parse().map_err(|_| bad_line(lineno))?))
    } else if let Some(gid) = kind.strip_prefix("global:") {
        GlobalInit::PointsToGlobal(GlobalId(gid.parse().map_err(|_| bad_line(lineno))?))
    } else {
        return Err(bad_line(lineno));
    };
    module.globals.insert(GlobalId(id), init);
    Ok(())
}

fn parse_function<'a>(header: &str, id: FunctionId, lines: &mut std::iter::Peekable<impl Iterator<Item = (usize, &'a str)>>, header_lineno: usize) -> Result<Function> {
    let mut parts = header.split_whitespace();
    let name = parts.next().ok_or_else(|| bad_line(header_lineno))?.to_string();
    let arg_count: u32 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| bad_line(header_lineno))?;
    let return_is_pointer = parts.next().map(|s| s == "1").unwrap_or(false);
    let arg_is_pointer: Vec<bool> = parts.map(|s| s == "1").collect();

    let mut blocks: Vec<BlockId> = Vec::new();
    let mut block_bodies: FxHashMap<BlockId, BasicBlock> = FxHashMap::default();
    let mut insts: FxHashMap<InstId, Instruction> = FxHashMap::default();
    let mut return_insts: Vec<InstId> = Vec::new();
    let mut current_block: Option<BlockId> = None;

    while let Some(&(lineno, raw)) = lines.peek() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            lines.next();
            continue;
        }
        if line == "endfunction" {
            lines.next();
            break;
        }
        if let Some(rest) = line.strip_prefix("block ") {
            lines.next();
            let (bid, succs) = parse_block_header(rest, lineno)?;
            blocks.push(bid);
            block_bodies.insert(bid, BasicBlock { id: bid, insts: Vec::new(), successors: succs });
            current_block = Some(bid);
            continue;
        }
        if let Some(rest) = line.strip_prefix("return ") {
            lines.next();
            let inst_id: u32 = rest.trim().parse().map_err(|_| bad_line(lineno))?;
            return_insts.push(InstId(inst_id));
            continue;
        }
        lines.next();
        let bid = current_block.ok_or_else(|| bad_line(lineno))?;
        let inst = parse_instruction(line, id, lineno)?;
        block_bodies.get_mut(&bid).expect("block exists").insts.push(inst.id);
        insts.insert(inst.id, inst);
    }

    let entry = *blocks.first().ok_or_else(|| bad_line(header_lineno))?;
    Ok(Function {
        id,
        name,
        arg_count,
        arg_is_pointer,
        return_is_pointer,
        blocks,
        entry,
        block_bodies,
        insts,
        return_insts,
    })
}

fn parse_block_header(rest: &str, lineno: usize) -> Result<(BlockId, Vec<BlockId>)> {
    let mut parts = rest.split_whitespace();
    let id: u32 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| bad_line(lineno))?;
    let succs = parts
        .next()
        .and_then(|s| s.strip_prefix("succs="))
        .map(|list| {
            list.split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().map(BlockId).map_err(|_| bad_line(lineno)))
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    Ok((BlockId(id), succs))
}

/// `<id> = <op> <operands...>`, or `<id> = <op>` for zero-operand ops.
fn parse_instruction(line: &str, func: FunctionId, lineno: usize) -> Result<Instruction> {
    let (lhs, rhs) = line.split_once('=').ok_or_else(|| bad_line(lineno))?;
    let id = InstId(lhs.trim().parse().map_err(|_| bad_line(lineno))?);
    let mut tokens = rhs.split_whitespace();
    let op = tokens.next().ok_or_else(|| bad_line(lineno))?;
    let operands: Vec<&str> = tokens.collect();

    let (opcode, is_pointer_typed) = match op {
        "alloca" => (Opcode::Alloca, true),
        "global" => {
            let g: u32 = operands.first().ok_or_else(|| bad_line(lineno))?.parse().map_err(|_| bad_line(lineno))?;
            (Opcode::Global(GlobalId(g)), true)
        }
        "null" => (Opcode::NullConst, true),
        "gep" => {
            let base = parse_value(operands.first().ok_or_else(|| bad_line(lineno))?, func, lineno)?;
            let offset: i64 = operands.get(1).ok_or_else(|| bad_line(lineno))?.parse().map_err(|_| bad_line(lineno))?;
            (Opcode::BitcastOrGep { base, offset }, true)
        }
        "load" => {
            let ptr = parse_value(operands.first().ok_or_else(|| bad_line(lineno))?, func, lineno)?;
            (Opcode::Load { ptr }, true)
        }
        "store" => {
            let ptr = parse_value(operands.first().ok_or_else(|| bad_line(lineno))?, func, lineno)?;
            let value = parse_value(operands.get(1).ok_or_else(|| bad_line(lineno))?, func, lineno)?;
            (Opcode::Store { ptr, value }, false)
        }
        "phi" => {
            let incoming = operands.iter().map(|s| parse_value(s, func, lineno)).collect::<Result<Vec<_>>>()?;
            (Opcode::Phi { incoming }, true)
        }
        "select" => {
            let if_true = parse_value(operands.first().ok_or_else(|| bad_line(lineno))?, func, lineno)?;
            let if_false = parse_value(operands.get(1).ok_or_else(|| bad_line(lineno))?, func, lineno)?;
            (Opcode::Select { if_true, if_false }, true)
        }
        "call" => {
            let callee_tok = operands.first().ok_or_else(|| bad_line(lineno))?;
            let callee = if let Some(fid) = callee_tok.strip_prefix("fn:") {
                CallTarget::Direct(FunctionId(fid.parse().map_err(|_| bad_line(lineno))?))
            } else {
                CallTarget::Indirect(parse_value(callee_tok, func, lineno)?)
            };
            let kind_tok = operands.get(1).ok_or_else(|| bad_line(lineno))?;
            let kind = match *kind_tok {
                "malloc" => CallKind::Malloc,
                "calloc" => CallKind::Calloc,
                "realloc" => CallKind::Realloc,
                "free" => CallKind::Free,
                _ => CallKind::Ordinary,
            };
            let is_pointer_result = operands.get(2).map(|s| *s == "1").unwrap_or(false);
            let args = operands
                .get(3..)
                .unwrap_or(&[])
                .iter()
                .map(|s| parse_value(s, func, lineno))
                .collect::<Result<Vec<_>>>()?;
            (Opcode::Call(CallInfo { callee, args, is_pointer_result, kind }), is_pointer_result)
        }
        "cast" => {
            let operand = parse_value(operands.first().ok_or_else(|| bad_line(lineno))?, func, lineno)?;
            (Opcode::Cast { operand }, true)
        }
        "other" => (Opcode::Other, false),
        other => return Err(LotusFlowError::input(format!("line {}: unknown opcode '{other}'", lineno + 1))),
    };

    Ok(Instruction { id, opcode, is_pointer_typed })
}

fn parse_value(tok: &str, func: FunctionId, lineno: usize) -> Result<ValueId> {
    if let Some(n) = tok.strip_prefix('%') {
        return Ok(ValueId::Inst(InstId(n.parse().map_err(|_| bad_line(lineno))?)));
    }
    if let Some(n) = tok.strip_prefix('@') {
        return Ok(ValueId::Global(GlobalId(n.parse().map_err(|_| bad_line(lineno))?)));
    }
    if let Some(n) = tok.strip_prefix("arg") {
        return Ok(ValueId::Arg(func, n.parse().map_err(|_| bad_line(lineno))?));
    }
    Err(bad_line(lineno))
}

fn bad_line(lineno: usize) -> LotusFlowError {
    LotusFlowError::input(format!("line {}: malformed", lineno + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct ScratchFile(PathBuf);

    impl ScratchFile {
        fn write(name: &str, contents: &str) -> Self {
            let path = std::env::temp_dir().join(format!("lotusflow-test-{name}-{}.ir", std::process::id()));
            fs::File::create(&path).unwrap().write_all(contents.as_bytes()).unwrap();
            Self(path)
        }
    }

    impl Drop for ScratchFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn parses_null_deref_scenario() {
        let file = ScratchFile::write(
            "null_deref",
            "function f 0 0\n\
             block 0 succs=\n\
             0 = null\n\
             1 = load %0\n\
             return 1\n\
             endfunction\n",
        );
        let module = parse_module(&file.0).unwrap();
        assert_eq!(module.function_order.len(), 1);
        let f = module.function(FunctionId(0));
        assert_eq!(f.insts.len(), 2);
        assert!(matches!(f.inst(InstId(0)).opcode, Opcode::NullConst));
        assert!(matches!(f.inst(InstId(1)).opcode, Opcode::Load { .. }));
    }

    /// Drives the full parse -> analyze -> check pipeline through every
    /// spec §8 end-to-end scenario. Kept as one test (rather than six) so
    /// each `Session::open`/drop pair runs to completion before the next
    /// begins, since `SESSION_ACTIVE` forbids overlapping sessions in one
    /// process and the default test harness runs `#[test]` fns concurrently.
    #[test]
    fn runs_every_spec_scenario_end_to_end() {
        let scenario = |name: &str, ir: &str, vuln_type: &str, use_npa: bool| -> usize {
            let file = ScratchFile::write(name, ir);
            let module = parse_module(&file.0).unwrap();
            let mut session = Session::open(AnalysisConfig::default()).unwrap();
            let analysis = session.analyze(&module);
            session.run_checker(&module, &analysis, VulnType::from_str(vuln_type).unwrap(), use_npa);
            session.bug_reports().total_reports()
        };

        // 1. Direct null deref: %p = null; %x = load %p.
        assert_eq!(
            scenario(
                "s1",
                "function f 0 0\n\
                 block 0 succs=\n\
                 0 = null\n\
                 1 = load %0\n\
                 return 1\n\
                 endfunction\n",
                "nullpointer",
                false,
            ),
            1
        );

        // 2. Null through store/load: store null, %slot; %p = load %slot; %x = load %p.
        assert_eq!(
            scenario(
                "s2",
                "function f 0 0\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 1 = null\n\
                 2 = store %0 %1\n\
                 3 = load %0\n\
                 4 = load %3\n\
                 return 4\n\
                 endfunction\n",
                "nullpointer",
                false,
            ),
            1
        );

        // 3. Use-after-free via GEP, with realloc blocking the flow.
        assert_eq!(
            scenario(
                "s3",
                "function f 1 0 1\n\
                 block 0 succs=\n\
                 0 = call fn:1 free 0 arg0\n\
                 1 = gep arg0 8\n\
                 2 = load %1\n\
                 return 2\n\
                 endfunction\n\
                 function freefn 1 0 1\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 return 0\n\
                 endfunction\n",
                "useafterfree",
                false,
            ),
            1
        );
        assert_eq!(
            scenario(
                "s3b",
                "function f 1 0 1\n\
                 block 0 succs=\n\
                 0 = call fn:1 free 0 arg0\n\
                 1 = call fn:2 realloc 1 arg0\n\
                 2 = load %1\n\
                 return 2\n\
                 endfunction\n\
                 function freefn 1 0 1\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 return 0\n\
                 endfunction\n\
                 function reallocfn 1 1 1\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 return 0\n\
                 endfunction\n",
                "useafterfree",
                false,
            ),
            0
        );

        // 4. Stack address escape: %a = alloca i32; store %a, @global_ptr.
        assert_eq!(
            scenario(
                "s4",
                "global 0 none\n\
                 function f 0 0\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 1 = store @0 %0\n\
                 return 1\n\
                 endfunction\n",
                "stackaddress",
                false,
            ),
            1
        );

        // 5. Free of non-heap, with realloc suppressing the flow.
        assert_eq!(
            scenario(
                "s5",
                "function f 0 0\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 1 = call fn:1 free 0 %0\n\
                 return 1\n\
                 endfunction\n\
                 function freefn 1 0 1\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 return 0\n\
                 endfunction\n",
                "freenonheap",
                false,
            ),
            1
        );
        assert_eq!(
            scenario(
                "s5b",
                "function f 0 0\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 1 = call fn:1 realloc 1 %0\n\
                 2 = call fn:2 free 0 %1\n\
                 return 2\n\
                 endfunction\n\
                 function reallocfn 1 1 1\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 return 0\n\
                 endfunction\n\
                 function freefn 1 0 1\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 return 0\n\
                 endfunction\n",
                "freenonheap",
                false,
            ),
            0
        );

        // 6. Indirect call resolution via a PHI of two function-pointer globals.
        {
            let file = ScratchFile::write(
                "s6",
                "global 0 func:1\n\
                 global 1 func:2\n\
                 function f 0 0\n\
                 block 0 succs=\n\
                 0 = global 0\n\
                 1 = global 1\n\
                 2 = phi %0 %1\n\
                 3 = call %2 other 0\n\
                 return 3\n\
                 endfunction\n\
                 function g 0 0\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 return 0\n\
                 endfunction\n\
                 function h 0 0\n\
                 block 0 succs=\n\
                 0 = alloca\n\
                 return 0\n\
                 endfunction\n",
            );
            let module = parse_module(&file.0).unwrap();
            let session = Session::open(AnalysisConfig::default()).unwrap();
            let analysis = session.analyze(&module);

            let f = FunctionId(0);
            let g = FunctionId(1);
            let h = FunctionId(2);
            let targets = analysis.funcptr.get_targets(f, InstId(3)).expect("call site resolved");
            assert!(targets.contains(&g) && targets.contains(&h));
            assert!(analysis.callgraph.callees(f).any(|c| c == g));
            assert!(analysis.callgraph.callees(f).any(|c| c == h));
        }
    }

    #[test]
    fn parses_use_after_free_scenario_with_call_kinds() {
        let file = ScratchFile::write(
            "uaf",
            "function f 1 0 1\n\
             block 0 succs=\n\
             0 = call fn:1 free 0 arg0\n\
             1 = gep arg0 8\n\
             2 = load %1\n\
             return 2\n\
             endfunction\n\
             function freefn 1 0 1\n\
             block 0 succs=\n\
             0 = alloca\n\
             return 0\n\
             endfunction\n",
        );
        let module = parse_module(&file.0).unwrap();
        let f = module.function(FunctionId(0));
        match &f.inst(InstId(0)).opcode {
            Opcode::Call(info) => assert_eq!(info.kind, CallKind::Free),
            other => panic!("expected a call, got {other:?}"),
        }
    }
}
