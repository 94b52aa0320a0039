// Merger(2w): combines two already-smoothed width-w step sequences into one
// width-2w step sequence. Recursive in the classical Batcher-style
// construction: even/odd-indexed inputs cross into different width-w
// sub-mergers, then a final layer of w balancers interleaves their outputs.

use crate::counting_network::balancer::Balancer;
use crate::error::{Result, ToolkitError};

enum Node {
    Base(Balancer),
    Recursive {
        half: usize,
        subs: [Box<Merger>; 2],
        final_layer: Vec<Balancer>,
    },
}

/// Width-`2w` merging network built from balancers; `width` must be a power
/// of two no smaller than 2.
pub struct Merger {
    width: usize,
    node: Node,
}

impl Merger {
    pub fn new(width: usize) -> Result<Self> {
        if width < 2 || !width.is_power_of_two() {
            return Err(ToolkitError::InvalidArgument(format!(
                "merger width must be a power of two >= 2, got {width}"
            )));
        }
        let node = if width == 2 {
            Node::Base(Balancer::new())
        } else {
            let half = width / 2;
            Node::Recursive {
                half,
                subs: [Box::new(Merger::new(half)?), Box::new(Merger::new(half)?)],
                final_layer: (0..half).map(|_| Balancer::new()).collect(),
            }
        };
        Ok(Self { width, node })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Routes one token that entered on input wire `input` (`< width`) to an
    /// output wire, also `< width`. Which wire a balancer picks never depends
    /// on which wire the token arrived on — only arrival order matters; the
    /// `input` argument only steers it to the correct sub-network.
    pub fn route(&self, input: usize) -> usize {
        debug_assert!(input < self.width);
        match &self.node {
            Node::Base(balancer) => balancer.traverse(),
            Node::Recursive { half, subs, final_layer } => {
                let parity = input % 2;
                let sub_input = input / 2;
                let j = subs[parity].route(sub_input);
                let bit = final_layer[j].traverse();
                bit * half + j
            }
        }
    }
}
