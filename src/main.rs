//! Deep16 Simulator - CLI Entry Point
//!
//! Commands:
//! - `deep16 run <program>` - Run an ASM or hex image file
//! - `deep16 debug <program>` - Interactive debugger
//! - `deep16 asm <source>` - Assemble and print a listing
//! - `deep16 disasm <words>...` - Disassemble hex words
//! - `deep16 test` - Built-in self-test

use clap::{Parser, Subcommand};
use deep16::asm::disasm::{disassemble, disassemble_with_address};
use deep16::cpu::is_screen_address;
use deep16::{assemble, Config, Cpu, MemoryWrite};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deep16")]
#[command(version = "0.1.0")]
#[command(about = "Instruction-set simulator, assembler and disassembler for the Deep16 CPU")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print every executed instruction
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the .asm source or hex image
        program: PathBuf,
        /// Maximum number of instructions to execute
        #[arg(short, long)]
        max_steps: Option<u64>,
        /// Initial PC (hex)
        #[arg(long, value_parser = parse_hex_u16)]
        entry: Option<u16>,
        /// Start at the autoload ROM instead of the program
        #[arg(long)]
        rom: bool,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the .asm source or hex image
        program: PathBuf,
    },
    /// Assemble source and print a listing
    Asm {
        /// Path to the source file
        source: PathBuf,
        /// Write a hex image to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Disassemble hex words
    Disasm {
        /// Words in hex, e.g. FC21 FFFF
        #[arg(required = true, value_parser = parse_hex_u16)]
        words: Vec<u16>,
        /// Address of the first word (hex)
        #[arg(short, long, value_parser = parse_hex_u32, default_value = "0")]
        address: u32,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.trace);

    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ {}", e);
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    if cli.trace {
        config.run.trace = true;
    }

    match cli.command {
        Some(Commands::Run { program, max_steps, entry, rom, json }) => {
            if let Some(steps) = max_steps {
                config.run.max_steps = steps;
            }
            if let Some(pc) = entry {
                config.engine.entry = pc;
            }
            if rom {
                config.engine.start = deep16::config::StartMode::Rom;
            }
            run_program(&program, &config, json);
        }
        Some(Commands::Debug { program }) => {
            debug_program(&program, config);
        }
        Some(Commands::Asm { source, output, json }) => {
            assemble_file(&source, output.as_deref(), json);
        }
        Some(Commands::Disasm { words, address }) => {
            print!("{}", disassemble(&words, address));
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("Deep16 Simulator v0.1.0");
            println!();
            println!("Use --help for available commands");
        }
    }
}

/// Logs go to stderr, filtered by `DEEP16_LOG` (default `warn`).
fn init_logging(trace: bool) {
    let default = if trace { "warn,deep16=trace" } else { "warn" };
    let filter = EnvFilter::try_from_env("DEEP16_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_hex_u32(text: &str) -> Result<u32, String> {
    let digits = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .trim_start_matches('$');
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{}': {}", text, e))
}

fn parse_hex_u16(text: &str) -> Result<u16, String> {
    let value = parse_hex_u32(text)?;
    u16::try_from(value).map_err(|_| format!("value '{}' does not fit in 16 bits", text))
}

/// Parse a hex image: `ADDR: WORD [WORD...]` lines, or bare words
/// continuing from the previous address. `;` starts a comment.
fn parse_image(text: &str) -> Result<Vec<MemoryWrite>, String> {
    let mut writes = Vec::new();
    let mut address = 0u32;
    for (idx, line) in text.lines().enumerate() {
        let line = line.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let words = match line.split_once(':') {
            Some((addr, rest)) => {
                address = parse_hex_u32(addr).map_err(|e| format!("line {}: {}", idx + 1, e))?;
                rest
            }
            None => line,
        };
        for word in words.split_whitespace() {
            let value = parse_hex_u16(word).map_err(|e| format!("line {}: {}", idx + 1, e))?;
            writes.push(MemoryWrite { address, value });
            address += 1;
        }
    }
    Ok(writes)
}

fn format_image(writes: &[MemoryWrite]) -> String {
    writes
        .iter()
        .map(|w| format!("{:05X}: {:04X}\n", w.address, w.value))
        .collect()
}

/// Load a program as memory writes, assembling `.asm` sources.
fn load_program_file(path: &Path) -> Vec<MemoryWrite> {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read {}: {}", path.display(), e);
            process::exit(1);
        }
    };

    if path.extension().is_some_and(|ext| ext == "asm") {
        let asm = assemble(&text);
        if !asm.success {
            for message in asm.error_messages() {
                eprintln!("❌ {}", message);
            }
            process::exit(1);
        }
        println!("📝 Assembled {} words", asm.word_count());
        asm.memory_changes
    } else {
        match parse_image(&text) {
            Ok(writes) => {
                println!("📂 Loaded {} words", writes.len());
                writes
            }
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                process::exit(1);
            }
        }
    }
}

fn run_program(path: &Path, config: &Config, json: bool) {
    println!("🔧 Running: {}", path.display());
    let program = load_program_file(path);

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_program(&program) {
        eprintln!("❌ Failed to load program: {}", e);
        process::exit(1);
    }
    config.apply(&mut cpu);
    cpu.set_memory_observer(|addr, value| {
        if is_screen_address(addr) {
            let ch = char::from_u32((value & 0xFF) as u32).filter(|c| !c.is_control()).unwrap_or('.');
            println!("🖥  screen[{:05X}] = {:04X} '{}'", addr, value, ch);
        }
    });

    println!();
    println!("━━━ Execution ━━━");

    let max_steps = config.run.max_steps;
    if config.run.trace {
        while cpu.is_running() && cpu.cycles < max_steps {
            let (cs, pc) = (cpu.regs.seg.cs, cpu.regs.pc());
            let word = cpu.mem.read(cpu.regs.fetch_address()).unwrap_or(0xFFFF);
            cpu.step();
            println!(
                "{:04X}:{:04X}  {:04X}  {:<20} PSW={:04X}",
                cs,
                pc,
                word,
                disassemble_with_address(word, pc as u32),
                cpu.regs.psw.bits()
            );
        }
    } else {
        cpu.run(max_steps);
    }

    println!();
    if json {
        match serde_json::to_string_pretty(&cpu.snapshot()) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("❌ Failed to serialize state: {}", e);
                process::exit(1);
            }
        }
    } else {
        print_state(&cpu);
    }

    if cpu.is_running() {
        println!();
        println!("⚠️  Reached step limit ({}). Use --max-steps to increase.", max_steps);
    }
}

fn print_state(cpu: &Cpu) {
    use deep16::cpu::registers::register_name;

    println!("━━━ Result ━━━");
    println!("Cycles: {}", cpu.cycles);
    println!("State: {:?}", cpu.state);
    for row in 0..4u8 {
        let line: Vec<String> = (0..4u8)
            .map(|col| {
                let idx = row * 4 + col;
                format!("{:>3}={:04X}", register_name(idx), cpu.regs.get(idx))
            })
            .collect();
        println!("{}", line.join("  "));
    }
    let psw = cpu.regs.psw;
    println!(
        "PSW={:04X}  N={} Z={} V={} C={} I={} S={}",
        psw.bits(),
        psw.negative() as u8,
        psw.zero() as u8,
        psw.overflow() as u8,
        psw.carry() as u8,
        psw.interrupts_enabled() as u8,
        psw.shadow_view() as u8
    );
    let seg = cpu.regs.seg;
    println!("CS={:04X}  DS={:04X}  SS={:04X}  ES={:04X}", seg.cs, seg.ds, seg.ss, seg.es);
}

#[cfg(feature = "tui")]
fn debug_program(path: &Path, config: Config) {
    println!("🔍 Loading: {}", path.display());
    let program = load_program_file(path);

    println!("🚀 Launching debugger...");
    if let Err(e) = deep16::run_debugger(program, config) {
        eprintln!("❌ Debugger error: {}", e);
        process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &Path, _config: Config) {
    eprintln!("❌ Built without the `tui` feature");
    process::exit(1);
}

fn assemble_file(source_path: &Path, output: Option<&Path>, json: bool) {
    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            process::exit(1);
        }
    };

    let asm = assemble(&source);

    if json {
        match serde_json::to_string_pretty(&asm) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("❌ Failed to serialize result: {}", e);
                process::exit(1);
            }
        }
    } else {
        for entry in &asm.listing {
            let addr = entry.address.map(|a| format!("{:05X}", a)).unwrap_or_default();
            let words: Vec<String> = entry.words.iter().take(3).map(|w| format!("{:04X}", w)).collect();
            println!("{:>4} {:>5}  {:<15} {}", entry.line, addr, words.join(" "), entry.source);
        }
        if !asm.symbols.is_empty() {
            println!();
            println!("Symbols:");
            for (name, addr) in &asm.symbols {
                println!("  {:<16} {:05X}", name, addr);
            }
        }
    }

    if !asm.success {
        for message in asm.error_messages() {
            eprintln!("❌ {}", message);
        }
        process::exit(1);
    }

    if let Some(out_path) = output {
        if let Err(e) = std::fs::write(out_path, format_image(&asm.memory_changes)) {
            eprintln!("❌ Failed to write {}: {}", out_path.display(), e);
            process::exit(1);
        }
        eprintln!("✓ Saved {} words to {}", asm.word_count(), out_path.display());
    }
}

fn run_self_test() {
    println!("━━━ Deep16 Simulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    let mut check = |name: &str, ok: bool| {
        print!("{}... ", name);
        if ok {
            println!("✓");
            passed += 1;
        } else {
            println!("✗");
            failed += 1;
        }
    };

    let run = |source: &str| -> Option<Cpu> {
        let asm = assemble(source);
        if !asm.success {
            return None;
        }
        let mut cpu = Cpu::new();
        cpu.load_program(&asm.memory_changes).ok()?;
        cpu.run(10_000);
        Some(cpu)
    };

    check("LDI range", assemble("LDI 32767").success && !assemble("LDI 32768").success);

    check(
        "Immediate add",
        run("LSI R1, 5\nADD R1, 2\nHALT").is_some_and(|cpu| cpu.regs.get(1) == 7),
    );

    check(
        "Delay slot executes",
        run("LSI R1, 0\nJZ skip\nLSI R2, 7\nLSI R3, 1\nskip: HALT")
            .is_some_and(|cpu| cpu.regs.get(2) == 7 && cpu.regs.get(3) == 0),
    );

    check(
        "Fibonacci loop",
        run("\
            LSI R0, 0
            LSI R1, 1
            LSI R2, 10
        loop:
            MOV R3, R1
            ADD R1, R0
            MOV R0, R3
            SUB R2, 1
            JNZ loop
            NOP
            HALT")
        .is_some_and(|cpu| cpu.regs.get(0) == 55),
    );

    check(
        "Segmented store",
        run("\
            LDI 0x1000
            MOV DS, R0
            LSI R1, 5
            LSI R2, 9
            ST R2, [R1]
            HALT")
        .is_some_and(|cpu| cpu.mem.read(0x10005) == Some(9)),
    );

    check("Disassembly round trip", (0..=0xFFFFu16).step_by(7).all(|word| {
        let text = deep16::asm::disassemble_instruction(word);
        text.starts_with("???") || text.starts_with("JML") || {
            let asm = assemble(&text);
            asm.success && asm.memory_changes[0].value == word
        }
    }));

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        process::exit(1);
    }
}
