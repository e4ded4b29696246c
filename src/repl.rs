use async_trait::async_trait;
use rustyline::{error::ReadlineError, Editor};
use tokio::sync::mpsc;

#[derive(Debug, PartialEq, Eq)]
pub enum HandleUserInputError {
    Terminate,
}

#[async_trait]
pub trait HandleUserInput {
    async fn handle(&mut self, user_input: String) -> Result<(), HandleUserInputError>;
}

pub struct Repl<H: HandleUserInput + Send> {
    handler: H,
    prompt: String,
}

impl<H: HandleUserInput + Send> Repl<H> {
    pub fn new(handler: H, prompt: &str) -> Self {
        Self {
            handler,
            prompt: prompt.to_string(),
        }
    }

    /// Read lines until the handler asks to stop or input ends.
    ///
    /// The line editor blocks, so it runs on a blocking thread and waits for
    /// each line to be handled before prompting again.
    pub async fn serve(&mut self) {
        let (line_tx, mut line_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();

        let prompt = self.prompt.clone();
        let reader = tokio::task::spawn_blocking(move || read_lines(&prompt, line_tx, ack_rx));

        while let Some(line) = line_rx.recv().await {
            let keep_going = self.handler.handle(line).await.is_ok();
            if ack_tx.send(keep_going).is_err() || !keep_going {
                break;
            }
        }

        drop(ack_tx);
        if let Err(e) = reader.await {
            log::warn!("Line reader ended abnormally: {:?}", e);
        }
    }
}

fn read_lines(
    prompt: &str,
    lines: mpsc::Sender<String>,
    acks: std::sync::mpsc::Receiver<bool>,
) {
    let mut rl = match Editor::<()>::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Failed to start line editor: {:?}", e);
            return;
        }
    };

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str());

                if lines.blocking_send(line).is_err() {
                    break;
                }
                match acks.recv() {
                    Ok(true) => {}
                    _ => break,
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                eprintln!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }
}
