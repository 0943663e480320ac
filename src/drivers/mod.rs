pub mod modbus_tcp;
