use anyhow::Result;
use clap::Args;
use handoff::common::codec::{self, Decoded};

#[derive(Args)]
pub struct DecodeSubCommand {
    /// Frame text, JSON envelope or compact form
    frame: String,
}

pub fn decode(sub_command_args: &DecodeSubCommand) -> Result<()> {
    match codec::decode(sub_command_args.frame.as_bytes())? {
        Decoded::Envelope(envelope) => {
            println!("{} for {}", envelope.kind(), envelope.transfer_id);
            println!("{}", envelope.to_json()?);
            if let Some(compact) = envelope.compact() {
                println!("Compact form: {}", compact);
            }
        }
        Decoded::DetailRequest(transfer_id) => {
            println!("Detail request for {}", transfer_id);
        }
    }

    Ok(())
}
