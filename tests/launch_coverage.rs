use gemm_eval::{
    consts::MAX_THREADS_PER_BLOCK,
    launch::{configure, TilingStrategy},
};

use proptest::prelude::*;

fn arb_strategy() -> impl Strategy<Value = TilingStrategy> {
    prop_oneof![
        Just(TilingStrategy::Blocked1d),
        Just(TilingStrategy::Blocked2d),
        (1u32..=32).prop_map(|block_size| TilingStrategy::Uniform { block_size }),
    ]
}

proptest! {
    #[test]
    fn grid_covers_the_output(
        strategy in arb_strategy(),
        m in 1usize..100_000,
        n in 1usize..100_000,
        k in 1usize..10_000,
    ) {
        let geometry = configure(strategy, m, n, k).unwrap();
        let (tile_w, tile_h) = (geometry.tile.0 as usize, geometry.tile.1 as usize);
        let (grid_x, grid_y) = (geometry.grid.x as usize, geometry.grid.y as usize);

        prop_assert!(grid_x * tile_w >= n);
        prop_assert!(grid_y * tile_h >= m);
        // No block lies entirely outside of C.
        prop_assert!((grid_x - 1) * tile_w < n);
        prop_assert!((grid_y - 1) * tile_h < m);
        prop_assert_eq!(geometry.grid.z, 1);
        prop_assert!(geometry.block.volume() <= MAX_THREADS_PER_BLOCK as u64);
    }
}
