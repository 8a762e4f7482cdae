mod args;
mod monitoring;

use args::{Args, Plan};
use clap::{error::ErrorKind, CommandFactory, FromArgMatches};
use mtkflash::{DaInfo, Flasher};
use std::io::BufRead;

fn main() {
  let matches = match Args::command().try_get_matches() {
    Ok(matches) => matches,
    Err(err) => match err.kind() {
      ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
        print!("{err}");
        std::process::exit(0);
      }
      _ => {
        eprint!("{err}");
        std::process::exit(1);
      }
    },
  };
  let args = match Args::from_arg_matches(&matches) {
    Ok(args) => args,
    Err(err) => {
      eprint!("{err}");
      std::process::exit(1);
    }
  };

  monitoring::init_logger(args.verbose);

  if args.setup {
    match mtkflash::host_setup() {
      Ok(()) => return,
      Err(err) => {
        tracing::error!("host setup failed: {err}");
        std::process::exit(1);
      }
    }
  }

  let interactive = !args.no_interactive;
  let plan = match args::build_plan(&args, &matches) {
    Ok(plan) => plan,
    Err(message) => {
      eprintln!("Error: {message}");
      eprintln!("{}", Args::command().render_usage());
      pause(interactive);
      std::process::exit(1);
    }
  };

  match run(plan) {
    Ok(()) => {
      tracing::info!("done!");
      pause(interactive);
    }
    Err(err) => {
      tracing::error!("{err}");
      pause(interactive);
      std::process::exit(if err.is_input_error() { 1 } else { 2 });
    }
  }
}

fn run(plan: Plan) -> mtkflash::Result<()> {
  let da = match plan.download_agent {
    Some(mut file) => {
      let da = DaInfo::load(&mut file)?;
      tracing::info!("DA identifier:   {}", da.identifier());
      tracing::info!("DA description:  {}", da.description());
      tracing::info!("DA count:        {}", da.entry_count());
      Some(da)
    }
    None => None,
  };

  tracing::info!("Waiting for MediaTek device...");
  tracing::info!("1. Detach cable and turn off the device");
  tracing::info!("2. Hold Play and Volume Down buttons");
  tracing::info!("3. Insert cable");
  tracing::info!("4. Release the buttons after successful detection");

  let mut flasher = Flasher::detect(plan.state, da, plan.operations, plan.reboot, None)?;
  flasher.run()
}

fn pause(interactive: bool) {
  if !interactive {
    return;
  }

  println!("\nPress enter to exit");
  let mut line = String::new();
  let _ = std::io::stdin().lock().read_line(&mut line);
}
