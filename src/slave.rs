use crate::codec::{self, DataType};
use crate::config::{DisplayConfig, SlaveConfig};
use crate::msg::{LogMsg, Status};
use crate::poll::Periodic;
use crate::store::{VirtualDevice, REGISTER_SPACE};

use itertools::Itertools;
use std::future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_modbus::prelude::{ExceptionCode, Request, Response, SlaveId};
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

/// Maps remote requests onto the shared store. One instance per accepted
/// connection, all sharing the same `VirtualDevice`.
pub struct RequestVector {
    store: Arc<Mutex<VirtualDevice>>,
    unit_id: SlaveId,
    log_send: Sender<LogMsg>,
}

impl RequestVector {
    pub fn new(store: Arc<Mutex<VirtualDevice>>, unit_id: SlaveId, log_send: Sender<LogMsg>) -> Self {
        Self {
            store,
            unit_id,
            log_send,
        }
    }

    fn log(&self, msg: LogMsg) {
        // The service runs outside the printer loop, so a full channel
        // drops the entry instead of blocking request handling.
        let _ = self.log_send.try_send(msg);
    }

    fn span(addr: u16, cnt: u16) -> Result<(), ExceptionCode> {
        if addr as usize + cnt as usize > REGISTER_SPACE {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(())
    }

    fn read_coils(&self, addr: u16, cnt: u16) -> Result<Vec<bool>, ExceptionCode> {
        Self::span(addr, cnt)?;
        self.log(LogMsg::info(&format!(
            "ReadCoils: address {}, count {}, unit {}.",
            addr, cnt, self.unit_id
        )));
        self.store
            .lock()
            .unwrap()
            .read_coils(addr, cnt)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    fn read_discrete_inputs(&self, addr: u16, cnt: u16) -> Result<Vec<bool>, ExceptionCode> {
        Self::span(addr, cnt)?;
        self.log(LogMsg::info(&format!(
            "ReadDiscreteInputs: address {}, count {}, unit {}.",
            addr, cnt, self.unit_id
        )));
        self.store
            .lock()
            .unwrap()
            .read_discrete_inputs(addr, cnt)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    fn read_holding(&self, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        Self::span(addr, cnt)?;
        self.log(LogMsg::info(&format!(
            "ReadHoldingRegisters: address {}, count {}, unit {}.",
            addr, cnt, self.unit_id
        )));
        self.store
            .lock()
            .unwrap()
            .read_holding(addr, cnt)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    fn read_input(&self, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        Self::span(addr, cnt)?;
        self.log(LogMsg::info(&format!(
            "ReadInputRegisters: address {}, count {}, unit {}.",
            addr, cnt, self.unit_id
        )));
        self.store
            .lock()
            .unwrap()
            .read_input(addr, cnt)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    fn write_coils(&self, addr: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        Self::span(addr, values.len() as u16)?;
        let mut store = self.store.lock().unwrap();
        for (i, value) in values.iter().enumerate() {
            store.set_coil(addr + i as u16, *value);
        }
        drop(store);
        self.log(LogMsg::info(&format!(
            "WriteCoils: address {}, count {}, unit {}.",
            addr,
            values.len(),
            self.unit_id
        )));
        Ok(())
    }

    fn write_registers(&self, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        Self::span(addr, values.len() as u16)?;
        let mut store = self.store.lock().unwrap();
        for (i, value) in values.iter().enumerate() {
            store.set_register(addr + i as u16, *value);
        }
        drop(store);
        self.log(LogMsg::info(&format!(
            "WriteRegisters: address {}, count {}, unit {}.",
            addr,
            values.len(),
            self.unit_id
        )));
        Ok(())
    }
}

impl tokio_modbus::server::Service for RequestVector {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadCoils(addr, cnt) => {
                self.read_coils(addr, cnt).map(Response::ReadCoils)
            }
            Request::ReadDiscreteInputs(addr, cnt) => self
                .read_discrete_inputs(addr, cnt)
                .map(Response::ReadDiscreteInputs),
            Request::ReadHoldingRegisters(addr, cnt) => self
                .read_holding(addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::ReadInputRegisters(addr, cnt) => self
                .read_input(addr, cnt)
                .map(Response::ReadInputRegisters),
            Request::WriteSingleCoil(addr, value) => self
                .write_coils(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleCoil(addr, value)),
            Request::WriteSingleRegister(addr, value) => self
                .write_registers(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            Request::WriteMultipleCoils(addr, values) => self
                .write_coils(addr, &values)
                .map(|_| Response::WriteMultipleCoils(addr, values.len() as u16)),
            Request::WriteMultipleRegisters(addr, values) => self
                .write_registers(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            _ => {
                self.log(LogMsg::err(&format!(
                    "Unsupported function code in request: {:?}",
                    req
                )));
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

/// Render the configured register window. Secondary slots of multi-word
/// types show `-`, values that would run past the address space show `--`.
pub fn render_table(store: &Mutex<VirtualDevice>, display: &DisplayConfig) -> Vec<String> {
    let store = store.lock().unwrap();
    let needed = display.r#type.registers_needed();
    let mut rows = Vec::with_capacity(display.count as usize);
    for index in 0..display.count {
        let Some(addr) = display.start.checked_add(index) else {
            break;
        };
        let text = if !display.r#type.is_primary(index as usize) {
            "-".to_owned()
        } else if addr as usize + needed > REGISTER_SPACE {
            "--".to_owned()
        } else if display.r#type == DataType::Bool {
            store.coil(addr).to_string()
        } else {
            let words = (0..needed)
                .map(|i| store.holding_register(addr + i as u16))
                .collect::<Vec<_>>();
            match codec::decode(&words, display.r#type, display.endianness) {
                Ok(value) => value.display(display.decimals),
                Err(_) => "--".to_owned(),
            }
        };
        rows.push(format!("{} = {}", addr, text));
    }
    rows
}

async fn serve(
    config: SlaveConfig,
    store: Arc<Mutex<VirtualDevice>>,
    status_send: Sender<Status>,
    log_send: Sender<LogMsg>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            let _ = status_send.send(Status::SlaveRunning(true)).await;
            let _ = log_send
                .send(LogMsg::ok(&format!(
                    "Slave listening on port {}, unit id {}.",
                    config.port, config.unit_id
                )))
                .await;
            let server = Server::new(listener);
            let unit_id = config.unit_id;
            let on_connected = |stream, socket_addr| {
                let store = store.clone();
                let log_send = log_send.clone();
                async move {
                    accept_tcp_connection(stream, socket_addr, |_socket_addr| {
                        Ok(Some(RequestVector::new(
                            store.clone(),
                            unit_id,
                            log_send.clone(),
                        )))
                    })
                }
            };
            let process_log = log_send.clone();
            let on_process_error = move |err| {
                let _ = process_log.try_send(LogMsg::err(&format!(
                    "Slave failed to process request [{}].",
                    err
                )));
            };
            server.serve(&on_connected, on_process_error).await?;
        }
        Err(e) => {
            let _ = status_send.send(Status::SlaveRunning(false)).await;
            let _ = log_send
                .send(LogMsg::err(&format!(
                    "Failed to bind port {} [{}].",
                    config.port, e
                )))
                .await;
        }
    }
    Ok(())
}

/// Running slave session. Dropping or stopping the handle severs the
/// transport and releases the store.
pub struct SlaveHandle {
    server: Option<JoinHandle<()>>,
    refresh: Periodic,
    store: Option<Arc<Mutex<VirtualDevice>>>,
}

impl SlaveHandle {
    pub fn start(
        config: SlaveConfig,
        display: DisplayConfig,
        status_send: Sender<Status>,
        log_send: Sender<LogMsg>,
    ) -> Self {
        let store = Arc::new(Mutex::new(VirtualDevice::new()));
        let server_store = store.clone();
        let server_log = log_send.clone();
        let server = tokio::spawn(async move {
            if let Err(e) = serve(config, server_store, status_send, server_log.clone()).await {
                let _ = server_log
                    .send(LogMsg::err(&format!("Slave session ended [{}].", e)))
                    .await;
            }
        });

        let mut refresh = Periodic::new();
        if let Some(ms) = display.refresh_ms {
            let table_store = store.clone();
            let table_log = log_send.clone();
            refresh.start(Duration::from_millis(ms), move || {
                let rows = render_table(&table_store, &display);
                let table_log = table_log.clone();
                async move {
                    let _ = table_log
                        .send(LogMsg::info(&format!("Registers: {}", rows.iter().join(", "))))
                        .await;
                }
            });
        }

        Self {
            server: Some(server),
            refresh,
            store: Some(store),
        }
    }

    pub fn store(&self) -> Option<&Arc<Mutex<VirtualDevice>>> {
        self.store.as_ref()
    }

    pub fn stop(&mut self) {
        self.refresh.stop();
        if let Some(server) = self.server.take() {
            server.abort();
        }
        self.store = None;
    }
}

impl Drop for SlaveHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Endianness;
    use tokio::sync::mpsc::channel;
    use tokio_modbus::server::Service;

    fn vector() -> (RequestVector, Arc<Mutex<VirtualDevice>>) {
        let store = Arc::new(Mutex::new(VirtualDevice::new()));
        let (log_send, _log_recv) = channel::<LogMsg>(64);
        (RequestVector::new(store.clone(), 1, log_send), store)
    }

    #[tokio::test]
    async fn ut_write_then_read_holding() {
        let (service, _store) = vector();
        let response = service
            .call(Request::WriteSingleRegister(7, 1234))
            .await
            .unwrap();
        assert_eq!(response, Response::WriteSingleRegister(7, 1234));

        let response = service
            .call(Request::ReadHoldingRegisters(6, 3))
            .await
            .unwrap();
        assert_eq!(response, Response::ReadHoldingRegisters(vec![0, 1234, 0]));
    }

    #[tokio::test]
    async fn ut_coils_alias_discrete_inputs() {
        let (service, _store) = vector();
        service
            .call(Request::WriteSingleCoil(5, true))
            .await
            .unwrap();
        let response = service
            .call(Request::ReadDiscreteInputs(5, 1))
            .await
            .unwrap();
        assert_eq!(response, Response::ReadDiscreteInputs(vec![true]));
    }

    #[tokio::test]
    async fn ut_remote_cannot_write_input_registers() {
        let (service, store) = vector();
        store.lock().unwrap().write_input_register(0, "42").unwrap();
        let response = service
            .call(Request::ReadInputRegisters(0, 1))
            .await
            .unwrap();
        assert_eq!(response, Response::ReadInputRegisters(vec![42]));

        // Register writes only ever land in the holding space.
        service
            .call(Request::WriteSingleRegister(0, 9999))
            .await
            .unwrap();
        assert_eq!(store.lock().unwrap().input_register(0), 42);
    }

    #[tokio::test]
    async fn ut_illegal_address_and_function() {
        let (service, _store) = vector();
        let res = service.call(Request::ReadHoldingRegisters(65535, 2)).await;
        assert_eq!(res, Err(ExceptionCode::IllegalDataAddress));

        let res = service.call(Request::MaskWriteRegister(0, 0xFFFF, 0)).await;
        assert_eq!(res, Err(ExceptionCode::IllegalFunction));
    }

    #[test]
    fn ut_render_table_placeholders() {
        let store = Mutex::new(VirtualDevice::new());
        store
            .lock()
            .unwrap()
            .write_typed(0, DataType::UInt32, "305419896", Endianness::Big)
            .unwrap();
        let display = DisplayConfig {
            start: 0,
            count: 4,
            r#type: DataType::UInt32,
            endianness: Endianness::Big,
            decimals: 4,
            refresh_ms: None,
        };
        let rows = render_table(&store, &display);
        assert_eq!(rows, vec!["0 = 305419896", "1 = -", "2 = 0", "3 = -"]);
    }

    #[test]
    fn ut_render_table_edge_of_space() {
        let store = Mutex::new(VirtualDevice::new());
        let display = DisplayConfig {
            start: 65534,
            count: 2,
            r#type: DataType::UInt32,
            endianness: Endianness::Big,
            decimals: 4,
            refresh_ms: None,
        };
        let rows = render_table(&store, &display);
        assert_eq!(rows, vec!["65534 = 0", "65535 = -"]);

        let display = DisplayConfig {
            start: 65535,
            count: 1,
            r#type: DataType::UInt32,
            endianness: Endianness::Big,
            decimals: 4,
            refresh_ms: None,
        };
        let rows = render_table(&store, &display);
        assert_eq!(rows, vec!["65535 = --"]);
    }
}
