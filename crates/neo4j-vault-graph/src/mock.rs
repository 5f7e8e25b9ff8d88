//! In-memory driver for tests.
//!
//! Models a server with an account table. Opening a handle is lazy, the
//! way real drivers are; credentials are checked by the connectivity probe.
//! User-management statements mutate the account table, so the full
//! create / authenticate / drop cycle can be exercised without a server.
//! Every boundary call is counted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use neo4j_vault_core::command::{ALTER_USER_PASSWORD, CREATE_USER, DROP_USER};
use neo4j_vault_core::Statement;

use crate::driver::{BasicAuth, Driver, DriverError, DriverHandle, Session, SessionOptions};

#[derive(Debug, Default)]
struct MockState {
    accounts: Mutex<HashMap<String, String>>,
    executed: Mutex<Vec<(String, Statement)>>,
    execution_failures: Mutex<VecDeque<DriverError>>,
    close_failure: Mutex<Option<DriverError>>,
    latency: Mutex<Duration>,
    unreachable: AtomicBool,
    generation: AtomicUsize,
    opens: AtomicUsize,
    probes: AtomicUsize,
    executions: AtomicUsize,
    handle_closes: AtomicUsize,
    session_closes: AtomicUsize,
}

/// A scriptable in-memory driver. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account.
    pub fn with_account(self, username: &str, password: &str) -> Self {
        self.state
            .accounts
            .lock()
            .unwrap()
            .insert(username.to_string(), password.to_string());
        self
    }

    pub fn has_account(&self, username: &str) -> bool {
        self.state.accounts.lock().unwrap().contains_key(username)
    }

    pub fn password_of(&self, username: &str) -> Option<String> {
        self.state.accounts.lock().unwrap().get(username).cloned()
    }

    /// Make open and probe fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Sever every handle opened so far. Their probes and sessions fail
    /// with a connection reset; handles opened later are unaffected.
    pub fn kill_handles(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Fail the next statement execution with `err`. Queued failures are
    /// consumed in order.
    pub fn fail_next_execution(&self, err: DriverError) {
        self.state.execution_failures.lock().unwrap().push_back(err);
    }

    /// Fail the next handle close with `err`.
    pub fn fail_next_close(&self, err: DriverError) {
        *self.state.close_failure.lock().unwrap() = Some(err);
    }

    /// Delay applied to open, probe and statement execution.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock().unwrap() = latency;
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.state.executions.load(Ordering::SeqCst)
    }

    pub fn handle_closes(&self) -> usize {
        self.state.handle_closes.load(Ordering::SeqCst)
    }

    pub fn session_closes(&self) -> usize {
        self.state.session_closes.load(Ordering::SeqCst)
    }

    /// Statements that executed successfully, with the database they ran on.
    pub fn executed(&self) -> Vec<(String, Statement)> {
        self.state.executed.lock().unwrap().clone()
    }

    async fn simulate_latency(&self) {
        let latency = *self.state.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Handle = MockHandle;

    async fn open(&self, _endpoint: &str, auth: &BasicAuth) -> Result<MockHandle, DriverError> {
        self.simulate_latency().await;
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("connection refused".into()));
        }
        Ok(MockHandle {
            driver: self.clone(),
            auth: auth.clone(),
            generation: self.state.generation.load(Ordering::SeqCst),
        })
    }
}

#[derive(Debug)]
pub struct MockHandle {
    driver: MockDriver,
    auth: BasicAuth,
    generation: usize,
}

impl MockHandle {
    fn severed(&self) -> bool {
        self.generation != self.driver.state.generation.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverHandle for MockHandle {
    type Session = MockSession;

    async fn verify_connectivity(&self) -> Result<(), DriverError> {
        self.driver.simulate_latency().await;
        let state = &self.driver.state;
        state.probes.fetch_add(1, Ordering::SeqCst);

        if state.unreachable.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("connection refused".into()));
        }
        if self.severed() {
            return Err(DriverError::ConnectionReset("EOF".into()));
        }
        match state.accounts.lock().unwrap().get(&self.auth.username) {
            Some(password) if *password == self.auth.password => Ok(()),
            _ => Err(DriverError::Auth(format!(
                "the client is unauthorized due to authentication failure for {}",
                self.auth.username
            ))),
        }
    }

    fn new_session(&self, options: &SessionOptions) -> MockSession {
        MockSession {
            driver: self.driver.clone(),
            generation: self.generation,
            database: options.database.clone(),
        }
    }

    async fn close(self) -> Result<(), DriverError> {
        let state = &self.driver.state;
        state.handle_closes.fetch_add(1, Ordering::SeqCst);
        match state.close_failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct MockSession {
    driver: MockDriver,
    generation: usize,
    database: String,
}

#[async_trait]
impl Session for MockSession {
    async fn execute_write(&mut self, statement: &Statement) -> Result<(), DriverError> {
        self.driver.simulate_latency().await;
        let state = &self.driver.state;
        state.executions.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = state.execution_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self.generation != state.generation.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionReset("EOF".into()));
        }

        let username = statement.get("username").unwrap_or_default().to_string();
        let password = statement.get("password").unwrap_or_default().to_string();
        {
            let mut accounts = state.accounts.lock().unwrap();
            match statement.text() {
                CREATE_USER => {
                    accounts.insert(username, password);
                }
                DROP_USER => {
                    if accounts.remove(&username).is_none() {
                        return Err(DriverError::Execution(format!(
                            "Failed to delete the specified user '{username}': User does not exist."
                        )));
                    }
                }
                ALTER_USER_PASSWORD => match accounts.get_mut(&username) {
                    Some(current) => *current = password,
                    None => {
                        return Err(DriverError::Execution(format!(
                            "Failed to alter the specified user '{username}': User does not exist."
                        )));
                    }
                },
                other => {
                    return Err(DriverError::Execution(format!("Invalid input: {other}")));
                }
            }
        }

        state
            .executed
            .lock()
            .unwrap()
            .push((self.database.clone(), statement.clone()));
        Ok(())
    }

    async fn close(self) -> Result<(), DriverError> {
        self.driver
            .state
            .session_closes
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
