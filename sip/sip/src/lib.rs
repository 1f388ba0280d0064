//! High level SIP user agent.
//!
//! An [`Agent`] owns the signaling socket, a registration binding and any
//! number of call [`Dialog`](dialog::DialogId)s, each with its own media
//! session. The embedding application drives it cooperatively:
//!
//! ```no_run
//! use sipkit_sip::{Agent, AgentConfig, AgentEvent};
//! use std::time::Duration;
//!
//! let mut config = AgentConfig::default();
//! config.username = "1001".into();
//! config.password = "secret".into();
//! config.registrar_host = "sip.example.org".into();
//!
//! let mut agent = Agent::new(config).unwrap();
//! agent.start().unwrap();
//!
//! loop {
//!     agent.run(Duration::from_millis(10));
//!     agent.run_media(Duration::from_millis(10));
//!
//!     while let Some(event) = agent.pop_event() {
//!         match event {
//!             AgentEvent::IncomingCall { dialog, from } => {
//!                 println!("call from {from}");
//!                 agent.answer_call(dialog, Default::default()).unwrap();
//!             }
//!             event => println!("{event:?}"),
//!         }
//!     }
//!
//!     std::thread::sleep(Duration::from_millis(1));
//! }
//! ```

mod agent;
mod config;
mod dialog;
mod error;
mod registration;

pub use agent::{Agent, AgentEvent};
pub use config::{AgentConfig, CallDevices, MediaDefaults};
pub use dialog::{CallDirection, DialogId, DialogState};
pub use error::{AgentError, AgentErrorKind};
pub use registration::RegistrationState;

pub use media_session::{
    AudioSink, AudioSource, SampleFormat, VideoFormat, VideoSink, VideoSource,
};
pub use sip_types::StatusCode;
