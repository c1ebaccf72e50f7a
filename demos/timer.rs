use std::time::Duration;

use clap::Parser;
use coloop::EventLoop;

/// Two tasks printing interleaved greetings on a timer.
#[derive(Parser)]
struct Args {
    /// Number of greetings each task prints.
    #[arg(long, default_value_t = 3)]
    ticks: u32,

    /// Pause between two greetings, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let lp = EventLoop::builder().name("timer-demo").build();
    let interval = Duration::from_millis(args.interval_ms);

    for (name, offset) in [("A", Duration::ZERO), ("a", interval / 2)] {
        let (lp2, ticks) = (lp.clone(), args.ticks);
        lp.spawn(async move {
            lp2.wait(offset).await;
            for i in 0..ticks {
                lp2.wait(interval).await;
                println!("Hello {name}{i}!");
            }
            Ok(())
        });
    }

    lp.run()?;

    Ok(())
}
