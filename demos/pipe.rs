use std::{
    io::{ErrorKind, Read, Write},
    os::unix::net::UnixStream,
    rc::Rc,
    time::Duration,
};

use clap::Parser;
use coloop::{Error, EventLoop};

/// A writer and a reader task talking over a socket pair. The reader gives up
/// once nothing has arrived for `--idle-ms`.
#[derive(Parser)]
struct Args {
    /// Number of messages to send.
    #[arg(long, default_value_t = 5)]
    messages: u32,

    /// Pause between two messages, in milliseconds.
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// How long the reader waits for the next message, in milliseconds.
    #[arg(long, default_value_t = 500)]
    idle_ms: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let lp = EventLoop::builder().name("pipe-demo").build();

    let (rx, tx) = UnixStream::pair()?;
    rx.set_nonblocking(true)?;
    tx.set_nonblocking(true)?;
    let (rx, tx) = (Rc::new(rx), Rc::new(tx));

    let writer = {
        let (lp2, tx) = (lp.clone(), tx.clone());
        let interval = Duration::from_millis(args.interval_ms);
        let messages = args.messages;
        lp.spawn(async move {
            for i in 0..messages {
                lp2.wait(interval).await;
                lp2.await_writable(&*tx, None).await?;
                (&*tx).write_all(format!("message {i}\n").as_bytes())?;
            }
            Ok(messages)
        })
    };

    let reader = {
        let (lp2, rx) = (lp.clone(), rx.clone());
        let idle = Duration::from_millis(args.idle_ms);
        lp.spawn(async move {
            let mut received = Vec::new();
            let mut buf = [0u8; 256];

            while lp2.await_readable(&*rx, Some(idle)).await? {
                match (&*rx).read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                    Err(e) => return Err(Error::from(e)),
                }
            }

            Ok(String::from_utf8_lossy(&received).into_owned())
        })
    };

    println!("sent {} message(s)", writer.join()?);
    print!("{}", reader.join()?);

    Ok(())
}
