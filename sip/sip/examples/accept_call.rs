use sipkit_sip::{Agent, AgentConfig, AgentEvent, CallDevices};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut config = AgentConfig::default();
    config.username = "bob".into();
    config.password = "hunter2".into();
    config.registrar_host = "example.org".into();

    let mut agent = Agent::new(config)?;
    agent.start()?;

    println!("waiting for calls on {}", agent.local_addr());

    loop {
        agent.run(Duration::from_millis(10));
        agent.run_media(Duration::from_millis(10));

        while let Some(event) = agent.pop_event() {
            match event {
                AgentEvent::IncomingCall { dialog, from } => {
                    println!("incoming call from {from}, accepting");
                    agent.answer_call(dialog, CallDevices::default())?;
                }
                AgentEvent::DialogStateChanged { dialog, state, .. } => {
                    println!("dialog {dialog:?} is now {state:?}");
                }
                event => println!("{event:?}"),
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
