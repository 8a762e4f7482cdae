use clap::{ArgAction, ArgMatches, Parser};
use clap_num::maybe_hex;
use mtkflash::{DeviceState, Operation, OperationKind};
use std::{
  fs::File,
  path::{Path, PathBuf},
};

#[derive(Parser, Debug)]
#[command(
  name = "mtkflash",
  version,
  about = "MediaTek device communication tool for MT8590-based Walkmans",
  long_about = None
)]
pub struct Args {
  /// Device is in DA Stage 2
  #[arg(short = '2', long = "da-stage2")]
  pub da_stage2: bool,

  /// Device is in Preloader mode
  #[arg(short = 'P', long)]
  pub preloader: bool,

  /// Path to MediaTek Download Agent binary
  #[arg(short = 'd', long = "download-agent", value_name = "FILE")]
  pub download_agent: Option<PathBuf>,

  /// EMMC address to read/write (decimal or 0x-prefixed hex)
  #[arg(short, long, value_parser = maybe_hex::<u64>, action = ArgAction::Append, value_name = "ADDRESS")]
  pub address: Vec<u64>,

  /// Length of data to read/write (decimal or 0x-prefixed hex)
  #[arg(short, long, value_parser = maybe_hex::<u64>, action = ArgAction::Append, value_name = "LENGTH")]
  pub length: Vec<u64>,

  /// Path to dump data to
  #[arg(short = 'D', long, action = ArgAction::Append, value_name = "FILE")]
  pub dump: Vec<PathBuf>,

  /// Path to flash data from
  #[arg(short = 'F', long, action = ArgAction::Append, value_name = "FILE")]
  pub flash: Vec<PathBuf>,

  /// Reboot device after completion
  #[arg(short = 'R', long)]
  pub reboot: bool,

  /// Produce verbose output
  #[arg(short, long)]
  pub verbose: bool,

  /// Don't prompt before exiting
  #[arg(short = 'n', long = "no-interactive")]
  pub no_interactive: bool,

  /// Install a udev rule for the device, then exit (Linux only)
  #[arg(long)]
  pub setup: bool,
}

/// Everything the flasher needs, with all files already opened.
#[derive(Debug)]
pub struct Plan {
  pub state: DeviceState,
  pub download_agent: Option<File>,
  pub operations: Vec<Operation>,
  pub reboot: bool,
}

/// `-a`/`-l` apply to the `-D`/`-F` that follows them, so the flags
/// have to be replayed in command-line order.
enum Directive {
  Address(u64),
  Length(u64),
  Operation(OperationKind, PathBuf),
}

fn timeline(args: &Args, matches: &ArgMatches) -> Vec<(usize, Directive)> {
  let mut items: Vec<(usize, Directive)> = Vec::new();

  if let Some(indices) = matches.indices_of("address") {
    items.extend(indices.zip(args.address.iter()).map(|(i, v)| (i, Directive::Address(*v))));
  }
  if let Some(indices) = matches.indices_of("length") {
    items.extend(indices.zip(args.length.iter()).map(|(i, v)| (i, Directive::Length(*v))));
  }
  if let Some(indices) = matches.indices_of("dump") {
    items.extend(
      indices
        .zip(args.dump.iter())
        .map(|(i, p)| (i, Directive::Operation(OperationKind::Dump, p.clone()))),
    );
  }
  if let Some(indices) = matches.indices_of("flash") {
    items.extend(
      indices
        .zip(args.flash.iter())
        .map(|(i, p)| (i, Directive::Operation(OperationKind::Flash, p.clone()))),
    );
  }

  items.sort_by_key(|(index, _)| *index);
  items
}

/// Validate the parsed flags and open every file they name.
pub fn build_plan(args: &Args, matches: &ArgMatches) -> Result<Plan, String> {
  let state = if args.da_stage2 {
    DeviceState::Stage2
  } else if args.preloader {
    DeviceState::Preloader
  } else {
    DeviceState::None
  };

  let mut address = 0u64;
  let mut length = 0u64;
  let mut operations = Vec::new();

  for (_, directive) in timeline(args, matches) {
    match directive {
      Directive::Address(value) => address = value,
      Directive::Length(value) => length = value,
      Directive::Operation(kind, path) => {
        if length == 0 {
          return Err("cannot perform zero-length operation".into());
        }
        let file = open_operation_file(kind, &path, length)?;
        operations.push(Operation {
          kind,
          address,
          length,
          file,
        });
      }
    }
  }

  if operations.is_empty() {
    return Err("no operations specified (use -D or -F)".into());
  }

  let download_agent = if state != DeviceState::Stage2 {
    let Some(path) = &args.download_agent else {
      return Err("MediaTek Download Agent binary is mandatory, unless device is in DA Stage 2".into());
    };
    let file = File::open(path)
      .map_err(|err| format!("unable to open Download Agent binary: {} ({err})", path.display()))?;
    Some(file)
  } else {
    None
  };

  Ok(Plan {
    state,
    download_agent,
    operations,
    reboot: args.reboot,
  })
}

fn open_operation_file(kind: OperationKind, path: &Path, length: u64) -> Result<File, String> {
  match kind {
    OperationKind::Dump => {
      File::create(path).map_err(|err| format!("unable to open file for dumping: {} ({err})", path.display()))
    }
    OperationKind::Flash => {
      let file =
        File::open(path).map_err(|err| format!("unable to open file for flashing: {} ({err})", path.display()))?;
      let size = file
        .metadata()
        .map_err(|err| format!("unable to inspect file for flashing: {} ({err})", path.display()))?
        .len();
      if size < length {
        return Err(format!("write length is greater than file size: {}", path.display()));
      }
      Ok(file)
    }
  }
}
