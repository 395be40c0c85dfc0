//! Runs effects off the loop. Every spawned command answers with at most one
//! message; an ask stream answers with a sequence ending in one terminal
//! message unless it was cancelled.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::error::ClientError;
use beacon_protocol::{AskEvent, AskRequest};
use tokio::sync::mpsc;

use super::core::{AskMsg, ConfigMsg, Effect, Msg};
use super::session::CancelHandle;
use crate::api;
use crate::session_store::SessionStore;
use crate::transport::Transport;

pub struct Scheduler<T> {
    transport: T,
    store: Arc<SessionStore>,
    tx: mpsc::UnboundedSender<Msg>,
}

impl<T: Transport + Clone + 'static> Scheduler<T> {
    pub fn new(transport: T, store: Arc<SessionStore>, tx: mpsc::UnboundedSender<Msg>) -> Self {
        Self {
            transport,
            store,
            tx,
        }
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.transport.set_token(token);
    }

    pub fn set_server_url(&mut self, server_url: &str) -> Result<(), ClientError> {
        self.transport.set_base_url(server_url)
    }

    /// Spawns `effect` with a clone of the current transport, so a token
    /// change made afterwards does not reach it.
    pub fn spawn(&self, effect: Effect) {
        let transport = self.transport.clone();
        let store = self.store.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Some(msg) = execute(effect, transport, &store, &tx).await {
                let _ = tx.send(msg);
            }
        });
    }
}

/// Performs one effect. Ask streams report through `tx` directly; everything
/// else returns its single answer.
pub async fn execute<T: Transport + Clone>(
    effect: Effect,
    transport: T,
    store: &SessionStore,
    tx: &mpsc::UnboundedSender<Msg>,
) -> Option<Msg> {
    let t = &transport;
    let msg = match effect {
        Effect::Quit
        | Effect::Redraw
        | Effect::SetServerUrl(_)
        | Effect::SetToken(_)
        | Effect::Deliver(_) => {
            tracing::error!(effect = ?effect, "loop-local effect reached the scheduler");
            return None;
        }
        Effect::SaveCredentials(session) => Msg::CredentialsSaved(
            store.save(&session).await.map_err(|err| format!("{err:#}")),
        ),
        Effect::WipeCredentials => {
            if let Err(err) = store.wipe().await {
                tracing::warn!(error = %format!("{err:#}"), "could not remove stored session");
            }
            return None;
        }
        Effect::Login {
            server_url,
            email,
            password,
        } => {
            let mut fresh = transport.clone();
            fresh.set_token(None);
            let result = match fresh.set_base_url(&server_url) {
                Ok(()) => api::login(&fresh, &email, &password).await,
                Err(err) => Err(err),
            };
            Msg::LoginFinished { server_url, result }
        }
        Effect::FetchWorkflows => Msg::WorkflowsLoaded(api::list_workflows(t).await),
        Effect::TriggerWorkflow { name } => {
            let result = api::trigger_workflow(t, &name).await;
            Msg::WorkflowTriggered {
                workflow: name,
                result,
            }
        }
        Effect::FetchRuns => Msg::RunsLoaded(api::list_runs(t).await),
        Effect::PollRuns { generation } => Msg::RunsPolled {
            generation,
            result: api::list_runs(t).await,
        },
        Effect::FetchRunDetail { id, attempt } => {
            let result = api::run_detail(t, &id).await;
            Msg::RunDetailLoaded {
                id,
                attempt,
                result,
            }
        }
        Effect::DismissRun { id } => {
            let result = api::dismiss_run(t, &id).await;
            Msg::RunDismissed { id, result }
        }
        Effect::FetchModules => Msg::ModulesLoaded(api::list_modules(t).await),
        Effect::SetModuleEnabled { name, enabled } => {
            let result = api::set_module_enabled(t, &name, enabled).await;
            Msg::ModuleUpdated { name, result }
        }
        Effect::FetchIntegrations => Msg::IntegrationsLoaded(api::list_integrations(t).await),
        Effect::SaveIntegrationFields {
            integration,
            values,
        } => {
            let result = api::save_integration_fields(t, &integration, values).await;
            Msg::Config(ConfigMsg::FieldsSaved {
                integration,
                result,
            })
        }
        Effect::FetchProviderState { integration } => {
            let result = api::provider_state(t, &integration).await;
            Msg::Config(ConfigMsg::ProviderStateLoaded {
                integration,
                result,
            })
        }
        Effect::FetchProviderFields {
            integration,
            provider,
        } => {
            let result = api::provider_fields(t, &integration, &provider).await;
            Msg::Config(ConfigMsg::ProviderFieldsLoaded {
                integration,
                provider,
                result,
            })
        }
        Effect::FetchModels {
            integration,
            provider,
            account,
            seq,
            cursor,
            limit,
        } => {
            let result =
                api::list_models(t, &integration, &provider, &account, limit, cursor.as_deref())
                    .await;
            Msg::Config(ConfigMsg::ModelsLoaded {
                integration,
                provider,
                account,
                seq,
                result,
            })
        }
        Effect::AddProviderAccount {
            integration,
            provider,
            request,
        } => {
            let result = api::add_account(t, &integration, &provider, &request).await;
            Msg::Config(ConfigMsg::AccountAdded {
                integration,
                result,
            })
        }
        Effect::DeleteAccount {
            integration,
            provider,
            account,
        } => {
            let result = api::delete_account(t, &integration, &provider, &account).await;
            Msg::Config(ConfigMsg::AccountDeleted {
                integration,
                result,
            })
        }
        Effect::SaveProfile {
            integration,
            profile,
            replaces,
        } => {
            let result =
                api::replace_profile(t, &integration, &profile, replaces.as_deref()).await;
            Msg::Config(ConfigMsg::ProfileSaved {
                integration,
                result,
            })
        }
        Effect::DeleteProfile { integration, name } => {
            let result = api::delete_profile(t, &integration, &name).await;
            Msg::Config(ConfigMsg::ProfileDeleted {
                integration,
                result,
            })
        }
        Effect::Ask { request, cancel } => {
            run_ask(t, request, cancel, tx).await;
            return None;
        }
        Effect::SubmitParams { request, cancel } => {
            let token = cancel.token();
            tokio::select! {
                _ = token.cancelled() => return None,
                result = api::submit_params(t, &request) => Msg::ParamsSubmitted {
                    request_id: cancel.id(),
                    result,
                },
            }
        }
        Effect::Timer { after_ms, fire } => {
            tokio::time::sleep(Duration::from_millis(after_ms)).await;
            Msg::Timer(fire)
        }
    };
    Some(msg)
}

/// Streams one ask. Sends decoded events in order, then `Closed` or
/// `Failed`. A cancelled ask sends nothing further.
pub async fn run_ask<T: Transport + ?Sized>(
    transport: &T,
    request: AskRequest,
    cancel: CancelHandle,
    tx: &mpsc::UnboundedSender<Msg>,
) {
    let request_id = cancel.id();
    let token = cancel.token();
    let send = |event: AskMsg| {
        let _ = tx.send(Msg::Ask { request_id, event });
    };

    let mut stream = tokio::select! {
        _ = token.cancelled() => return,
        opened = api::ask(transport, &request, token.clone()) => match opened {
            Ok(stream) => stream,
            Err(err) => {
                send(AskMsg::Failed(err));
                return;
            }
        },
    };

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(request_id, "ask stream cancelled");
                return;
            }
            next = stream.recv() => next,
        };
        match next {
            Some(Ok(payload)) => match serde_json::from_value::<AskEvent>(payload) {
                Ok(event) => send(AskMsg::Event(event)),
                Err(err) => tracing::debug!(request_id, error = %err, "skipping unknown ask event"),
            },
            Some(Err(err)) => {
                send(AskMsg::Failed(err));
                return;
            }
            None => {
                send(AskMsg::Closed);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use beacon_protocol::Profile;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::transport::{EventStream, Method};
    use crate::tui::session::{RequestClass, Session};

    #[derive(Default)]
    struct Script {
        calls: Vec<String>,
        responses: VecDeque<Result<Value, ClientError>>,
        events: Vec<Result<Value, ClientError>>,
    }

    #[derive(Clone, Default)]
    struct FakeTransport {
        script: Arc<Mutex<Script>>,
        base_url: Option<String>,
    }

    impl FakeTransport {
        fn respond(self, response: Result<Value, ClientError>) -> Self {
            self.script.lock().unwrap().responses.push_back(response);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.script.lock().unwrap().calls.clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn request(
            &self,
            method: Method,
            path: &str,
            _body: Option<Value>,
        ) -> Result<Value, ClientError> {
            let mut script = self.script.lock().unwrap();
            let prefix = self.base_url.as_deref().unwrap_or("");
            script.calls.push(format!("{method:?} {prefix}{path}"));
            script.responses.pop_front().unwrap_or(Ok(json!({})))
        }

        async fn stream(
            &self,
            path: &str,
            _body: Value,
            _cancel: CancellationToken,
        ) -> Result<EventStream, ClientError> {
            let events = {
                let mut script = self.script.lock().unwrap();
                script.calls.push(format!("STREAM {path}"));
                std::mem::take(&mut script.events)
            };
            let (tx, rx) = mpsc::unbounded_channel();
            for event in events {
                let _ = tx.send(event);
            }
            drop(tx);
            Ok(EventStream::new(rx, tokio::spawn(async {})))
        }

        fn set_token(&mut self, _token: Option<String>) {}

        fn set_base_url(&mut self, base_url: &str) -> Result<(), ClientError> {
            self.base_url = Some(base_url.to_owned());
            Ok(())
        }
    }

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn rename_deletes_old_profile_before_saving() {
        let (_dir, store) = store();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = FakeTransport::default();
        let effect = Effect::SaveProfile {
            integration: "assistant".to_owned(),
            profile: Profile {
                name: "work".to_owned(),
                provider: "openai".to_owned(),
                account: "main".to_owned(),
                model: "gpt-4o".to_owned(),
                is_default: false,
            },
            replaces: Some("old".to_owned()),
        };
        let msg = execute(effect, transport.clone(), &store, &tx).await;
        assert!(matches!(
            msg,
            Some(Msg::Config(ConfigMsg::ProfileSaved { result: Ok(()), .. }))
        ));
        assert_eq!(
            transport.calls(),
            vec![
                "Delete /integrations/assistant/profiles/old",
                "Post /integrations/assistant/profiles",
            ]
        );
    }

    #[tokio::test]
    async fn same_name_edit_saves_without_delete() {
        let (_dir, store) = store();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = FakeTransport::default();
        let effect = Effect::SaveProfile {
            integration: "assistant".to_owned(),
            profile: Profile {
                name: "work".to_owned(),
                provider: "openai".to_owned(),
                account: "main".to_owned(),
                model: "gpt-4o-mini".to_owned(),
                is_default: true,
            },
            replaces: Some("work".to_owned()),
        };
        let msg = execute(effect, transport.clone(), &store, &tx).await;
        assert!(matches!(
            msg,
            Some(Msg::Config(ConfigMsg::ProfileSaved { result: Ok(()), .. }))
        ));
        assert_eq!(
            transport.calls(),
            vec!["Post /integrations/assistant/profiles"]
        );
    }

    #[tokio::test]
    async fn failed_rename_delete_skips_save() {
        let (_dir, store) = store();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport =
            FakeTransport::default().respond(Err(ClientError::NotFound("old".to_owned())));
        let effect = Effect::SaveProfile {
            integration: "assistant".to_owned(),
            profile: Profile {
                name: "work".to_owned(),
                provider: "openai".to_owned(),
                account: "main".to_owned(),
                model: "gpt-4o".to_owned(),
                is_default: false,
            },
            replaces: Some("old".to_owned()),
        };
        let msg = execute(effect, transport.clone(), &store, &tx).await;
        assert!(matches!(
            msg,
            Some(Msg::Config(ConfigMsg::ProfileSaved { result: Err(_), .. }))
        ));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn login_uses_requested_server() {
        let (_dir, store) = store();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = FakeTransport::default().respond(Ok(json!({"token": "tok"})));
        let msg = execute(
            Effect::Login {
                server_url: "http://other".to_owned(),
                email: "a@b.c".to_owned(),
                password: "pw".to_owned(),
            },
            transport.clone(),
            &store,
            &tx,
        )
        .await;
        let Some(Msg::LoginFinished { result, server_url }) = msg else {
            panic!("expected login result");
        };
        assert_eq!(result.unwrap(), "tok");
        assert_eq!(server_url, "http://other");
        assert_eq!(transport.calls(), vec!["Post http://other/auth/login"]);
    }

    #[tokio::test]
    async fn ask_stream_ends_with_closed() {
        let transport = FakeTransport::default();
        transport.script.lock().unwrap().events = vec![
            Ok(json!({"type": "chunk", "text": "hi"})),
            Ok(json!({"type": "telemetry"})),
            Ok(json!({"type": "done"})),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new();
        let cancel = session.begin(RequestClass::Ask);
        let request = AskRequest {
            text: "hello".to_owned(),
            context: None,
        };
        run_ask(&transport, request, cancel.clone(), &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(Msg::Ask { request_id, event }) = rx.recv().await {
            assert_eq!(request_id, cancel.id());
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], AskMsg::Event(AskEvent::Chunk { text }) if text == "hi"));
        assert!(matches!(events[1], AskMsg::Event(AskEvent::Done)));
        assert!(matches!(events[2], AskMsg::Closed));
    }

    #[tokio::test]
    async fn cancelled_ask_sends_nothing() {
        let transport = FakeTransport::default();
        transport.script.lock().unwrap().events =
            vec![Ok(json!({"type": "chunk", "text": "late"}))];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new();
        let cancel = session.begin(RequestClass::Ask);
        session.cancel(RequestClass::Ask);
        let request = AskRequest {
            text: "hello".to_owned(),
            context: None,
        };
        run_ask(&transport, request, cancel, &tx).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stream_error_is_terminal() {
        let transport = FakeTransport::default();
        transport.script.lock().unwrap().events = vec![
            Ok(json!({"type": "chunk", "text": "par"})),
            Err(ClientError::Transport("reset".to_owned())),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new();
        let cancel = session.begin(RequestClass::Ask);
        let request = AskRequest {
            text: "hello".to_owned(),
            context: None,
        };
        run_ask(&transport, request, cancel, &tx).await;
        drop(tx);
        let mut last = None;
        while let Some(Msg::Ask { event, .. }) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(AskMsg::Failed(ClientError::Transport(_)))));
    }

    #[tokio::test]
    async fn cancelled_submit_sends_nothing() {
        let (_dir, store) = store();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new();
        let cancel = session.begin(RequestClass::Params);
        session.cancel(RequestClass::Params);
        let effect = Effect::SubmitParams {
            request: beacon_protocol::SubmitParamsRequest {
                target: "calendar.create".to_owned(),
                values: serde_json::Map::new(),
            },
            cancel,
        };
        let msg = execute(effect, FakeTransport::default(), &store, &tx).await;
        assert!(msg.is_none());
    }

    #[tokio::test]
    async fn save_credentials_reports_result() {
        let (_dir, store) = store();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = beacon_core::credentials::StoredSession::new("http://beacon.test", "tok");
        let msg = execute(
            Effect::SaveCredentials(session.clone()),
            FakeTransport::default(),
            &store,
            &tx,
        )
        .await;
        assert!(matches!(msg, Some(Msg::CredentialsSaved(Ok(())))));
        assert_eq!(store.load().await, Some(session));
    }
}
