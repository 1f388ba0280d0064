use sipkit_sip::{Agent, AgentConfig, AgentEvent, RegistrationState};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut config = AgentConfig::default();
    config.username = "bob".into();
    config.password = "hunter2".into();
    config.registrar_host = "example.org".into();

    let mut agent = Agent::new(config)?;

    // auto-register is on by default
    agent.start()?;

    loop {
        agent.run(Duration::from_millis(10));

        while let Some(event) = agent.pop_event() {
            match event {
                AgentEvent::RegisterResult { success, status } => {
                    println!("register result: success={success} status={status:?}");

                    if success {
                        // remove the binding again and wind down
                        agent.unregister()?;
                    }
                }
                AgentEvent::RegistrationStateChanged {
                    state: RegistrationState::Unregistered,
                } => {
                    return Ok(());
                }
                event => println!("{event:?}"),
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
