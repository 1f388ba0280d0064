use sipkit_sip::{
    Agent, AgentConfig, AgentEvent, CallDevices, DialogState, SampleFormat,
};
use std::io;
use std::time::Duration;

/// Playback device printing how much audio arrives
struct ConsoleSpeaker {
    samples: u64,
}

impl sipkit_sip::AudioSink for ConsoleSpeaker {
    fn format(&self) -> SampleFormat {
        SampleFormat::S16Le
    }

    fn write_audio(&mut self, _data: &[u8], samples: usize) -> io::Result<usize> {
        self.samples += samples as u64;

        if self.samples % 48000 < 160 {
            println!("~{}s of audio received", self.samples / 8000);
        }

        Ok(samples)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut config = AgentConfig::default();
    config.username = "bob".into();
    config.password = "hunter2".into();
    config.registrar_host = "example.org".into();
    config.media.stun_host = Some("stun.example.org".into());

    let mut agent = Agent::new(config)?;
    agent.start()?;

    let mut call = None;

    loop {
        agent.run(Duration::from_millis(10));
        agent.run_media(Duration::from_millis(10));

        while let Some(event) = agent.pop_event() {
            match event {
                AgentEvent::RegisterResult { success: true, .. } if call.is_none() => {
                    let devices = CallDevices {
                        audio_playback: Some(Box::new(ConsoleSpeaker { samples: 0 })),
                        ..Default::default()
                    };

                    let dialog = agent.make_call("sip:alice@example.org", devices)?;
                    println!("calling alice, dialog {dialog:?}");
                    call = Some(dialog);
                }
                AgentEvent::DialogStateChanged { dialog, state, .. } => {
                    println!("dialog {dialog:?} is now {state:?}");

                    if state == DialogState::Confirmed {
                        if let Some(stats) = agent.call_stats(dialog) {
                            println!("stats: {stats:?}");
                        }
                    }

                    if state.is_terminal() {
                        return Ok(());
                    }
                }
                event => println!("{event:?}"),
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
