// Contracts Module - Public ABIs Only

pub mod aggregator_v3_interface;
pub mod i_uniswap_v3_pool;

pub use aggregator_v3_interface::AggregatorV3Interface;
pub use i_uniswap_v3_pool::IUniswapV3Pool;
