use std::time::Duration;

use engine::{Dispatcher, Event, EventConsumer, MessageSource, PositionUpdate};
use eyre::bail;
use rumqttc::{
    AsyncClient, Event as MqttEvent, Incoming, MqttOptions, QoS, Transport as MqttTransport,
};

use crate::{
    backoff::{Backoff, BackoffConfig},
    config::Transport,
};

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub path: String,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl MqttConfig {
    fn broker(&self) -> String {
        match self.transport {
            Transport::Wss => format!("wss://{}:{}{}", self.host, self.port, self.path),
            Transport::Ws => format!("ws://{}:{}{}", self.host, self.port, self.path),
            Transport::Tls | Transport::Tcp => self.host.clone(),
        }
    }

    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.broker(), self.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true);
        match self.transport {
            Transport::Wss => options.set_transport(MqttTransport::wss_with_default_config()),
            Transport::Ws => options.set_transport(MqttTransport::Ws),
            Transport::Tls => options.set_transport(MqttTransport::tls_with_default_config()),
            Transport::Tcp => options.set_transport(MqttTransport::Tcp),
        };
        options
    }
}

/// Live train locations from the digitraffic MQTT broker.
pub struct MqttSource {
    config: MqttConfig,
    dispatcher: Dispatcher,
}

impl MqttSource {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            dispatcher: Dispatcher::new(),
        }
    }

    /// Polls the broker until the reconnect attempts run out.
    ///
    /// Every (re)connection subscribes to the configured topic again. A failed
    /// poll waits out the backoff delay and lets the event loop reconnect.
    #[tracing::instrument(skip(self), fields(client = %self.config.client_id, broker = %self.config.broker()))]
    pub async fn run(mut self) -> eyre::Result<()> {
        let (client, mut eventloop) = AsyncClient::new(self.config.options(), REQUEST_CAPACITY);
        let mut backoff = Backoff::new(self.config.backoff);
        let mut connected = false;

        loop {
            let polled = if connected {
                eventloop.poll().await.map_err(|err| err.to_string())
            } else {
                match tokio::time::timeout(self.config.connect_timeout, eventloop.poll()).await {
                    Ok(polled) => polled.map_err(|err| err.to_string()),
                    Err(_) => Err(format!(
                        "no answer within {:?}",
                        self.config.connect_timeout
                    )),
                }
            };

            match polled {
                Ok(MqttEvent::Incoming(Incoming::ConnAck(ack))) => {
                    debug!(code = ?ack.code, "connack");
                    connected = true;
                    backoff.reset();
                    self.dispatcher.dispatch(Event::Connected);
                    if let Err(err) = client.try_subscribe(self.config.topic.as_str(), QoS::AtMostOnce) {
                        error!(%err, topic = %self.config.topic, "subscribe failed");
                    }
                }
                Ok(MqttEvent::Incoming(Incoming::SubAck(ack))) => {
                    debug!(codes = ?ack.return_codes, topic = %self.config.topic, "subscribed");
                }
                Ok(MqttEvent::Incoming(Incoming::Publish(publish))) => {
                    self.dispatcher
                        .dispatch(publish_event(&publish.topic, &publish.payload));
                }
                Ok(_) => {}
                Err(reason) => {
                    let event = if connected {
                        Event::ConnectionLost { reason }
                    } else {
                        Event::ConnectionFailed { reason }
                    };
                    connected = false;
                    self.dispatcher.dispatch(event);

                    match backoff.next_delay() {
                        Some(delay) => {
                            info!(?delay, attempt = backoff.attempt(), "reconnecting");
                            tokio::time::sleep(delay).await;
                        }
                        None => bail!(
                            "giving up after {} failed reconnect attempts",
                            backoff.attempt()
                        ),
                    }
                }
            }
        }
    }
}

impl MessageSource for MqttSource {
    fn subscribe(&mut self, consumer: Box<dyn EventConsumer + Send>) {
        self.dispatcher.subscribe(consumer);
    }
}

fn publish_event(topic: &str, payload: &[u8]) -> Event {
    match PositionUpdate::from_payload(payload) {
        Ok(update) => Event::Position(update),
        Err(err) => Event::Malformed {
            topic: topic.to_string(),
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
fn config(transport: Transport) -> MqttConfig {
    MqttConfig {
        host: "rata.digitraffic.fi".to_string(),
        port: 443,
        transport,
        path: "/mqtt".to_string(),
        topic: "train-locations/#".to_string(),
        client_id: "myclientid_42".to_string(),
        keep_alive: Duration::from_secs(30),
        connect_timeout: Duration::from_secs(3),
        backoff: BackoffConfig::default(),
    }
}

#[test]
fn websocket_options_carry_url() {
    let options = config(Transport::Wss).options();
    assert_eq!(
        options.broker_address(),
        ("wss://rata.digitraffic.fi:443/mqtt".to_string(), 443)
    );
    assert_eq!(options.client_id(), "myclientid_42");
    assert_eq!(options.keep_alive(), Duration::from_secs(30));

    let options = config(Transport::Tcp).options();
    assert_eq!(options.broker_address().0, "rata.digitraffic.fi");
}

#[test]
fn publish_payloads_become_events() {
    let event = publish_event(
        "train-locations/2023-05-04/8",
        br#"{"trainNumber":8,"location":{"type":"Point","coordinates":[24.941,60.172]},"speed":45}"#,
    );
    let Event::Position(update) = event else {
        panic!("expected a position update");
    };
    assert_eq!(update.train_number, engine::TrainNumber(8));
    assert_eq!(update.speed, 45.0);

    let event = publish_event("train-locations/2023-05-04/9", b"not json");
    assert!(matches!(
        event,
        Event::Malformed { ref topic, .. } if topic == "train-locations/2023-05-04/9"
    ));
}

#[cfg(test)]
fn local_config(port: u16, max_attempts: u32) -> MqttConfig {
    MqttConfig {
        host: "127.0.0.1".to_string(),
        port,
        connect_timeout: Duration::from_secs(2),
        backoff: BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(20),
            max_attempts: Some(max_attempts),
        },
        ..config(Transport::Tcp)
    }
}

#[cfg(test)]
fn recorded(source: &mut MqttSource) -> std::sync::Arc<std::sync::Mutex<Vec<Event>>> {
    let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&events);
    source.subscribe(Box::new(move |event: &Event| {
        sink.lock().unwrap().push(event.clone());
    }));
    events
}

#[tokio::test]
async fn refused_broker_gives_up_after_max_attempts() {
    let mut source = MqttSource::new(local_config(1, 2));
    let events = recorded(&mut source);

    let outcome = tokio::time::timeout(Duration::from_secs(10), source.run())
        .await
        .expect("run did not stop");
    let err = outcome.unwrap_err();
    assert!(err.to_string().contains("2 failed reconnect attempts"), "{err}");

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3, "{events:?}");
    assert!(events
        .iter()
        .all(|event| matches!(event, Event::ConnectionFailed { .. })));
}

#[tokio::test]
async fn subscribes_on_connack_and_reports_lost_connection() {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 256];
        let connect = socket.read(&mut buf).unwrap();
        assert!(connect > 0 && buf[0] == 0x10, "expected CONNECT");
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();

        // first packet after the CONNACK, then hang up
        let next = socket.read(&mut buf).ok().filter(|n| *n > 0).map(|_| buf[0]);
        drop(socket);
        drop(listener);
        next
    });

    let mut source = MqttSource::new(local_config(port, 1));
    let events = recorded(&mut source);

    let outcome = tokio::time::timeout(Duration::from_secs(10), source.run())
        .await
        .expect("run did not stop");
    assert!(outcome.is_err());
    assert_eq!(broker.join().unwrap(), Some(0x82), "expected SUBSCRIBE");

    let events = events.lock().unwrap();
    assert!(
        matches!(
            events.as_slice(),
            [Event::Connected, Event::ConnectionLost { .. }, Event::ConnectionFailed { .. }]
        ),
        "{events:?}"
    );
}
