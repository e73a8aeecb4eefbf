//! Rollup protocol and NFT bridge ABI definitions
//!
//! Uses alloy's sol! macro to generate call/event types. Calls are encoded with
//! `SolCall::abi_encode` and sent through a [`ChainConnector`], so no provider
//! bound contract instances are generated.
//!
//! [`ChainConnector`]: crate::connector::ChainConnector

#![allow(clippy::too_many_arguments)]

use alloy::primitives::{address, Address};
use alloy::sol;

/// ArbSys precompile on the child chain
pub const ARB_SYS_ADDRESS: Address = address!("0000000000000000000000000000000000000064");

/// ArbRetryableTx precompile on the child chain
pub const ARB_RETRYABLE_TX_ADDRESS: Address =
    address!("000000000000000000000000000000000000006E");

/// NodeInterface virtual contract on the child chain (only reachable via eth_call/estimateGas)
pub const NODE_INTERFACE_ADDRESS: Address =
    address!("00000000000000000000000000000000000000C8");

sol! {
    // ========================================================================
    // Child chain precompiles
    // ========================================================================

    /// System precompile that records outgoing messages
    interface ArbSys {
        function withdrawEth(address destination) external payable returns (uint256);

        function sendTxToL1(address destination, bytes calldata data) external payable returns (uint256);

        event L2ToL1Tx(
            address caller,
            address indexed destination,
            uint256 indexed hash,
            uint256 indexed position,
            uint256 arbBlockNum,
            uint256 ethBlockNum,
            uint256 timestamp,
            uint256 callvalue,
            bytes data
        );
    }

    interface ArbRetryableTx {
        function getTimeout(bytes32 ticketId) external view returns (uint256);

        event TicketCreated(bytes32 indexed ticketId);

        event RedeemScheduled(
            bytes32 indexed ticketId,
            bytes32 indexed retryTxHash,
            uint64 indexed sequenceNum,
            uint64 donatedGas,
            address gasDonor,
            uint256 maxRefund,
            uint256 submissionFeeRefund
        );
    }

    interface NodeInterface {
        function constructOutboxProof(uint64 size, uint64 leaf)
            external
            view
            returns (bytes32 send, bytes32 root, bytes32[] memory proof);

        /// Reverts or returns nothing; only meaningful under eth_estimateGas
        function estimateRetryableTicket(
            address sender,
            uint256 deposit,
            address to,
            uint256 l2CallValue,
            address excessFeeRefundAddress,
            address callValueRefundAddress,
            bytes calldata data
        ) external;
    }

    // ========================================================================
    // Parent chain protocol contracts
    // ========================================================================

    interface Inbox {
        function depositEth() external payable returns (uint256);

        function calculateRetryableSubmissionFee(uint256 dataLength, uint256 baseFee)
            external
            view
            returns (uint256);

        event InboxMessageDelivered(uint256 indexed messageNum, bytes data);
    }

    interface Bridge {
        event MessageDelivered(
            uint256 indexed messageIndex,
            bytes32 indexed beforeInboxAcc,
            address inbox,
            uint8 kind,
            address sender,
            bytes32 messageDataHash,
            uint256 baseFeeL1,
            uint64 timestamp
        );
    }

    interface Outbox {
        function isSpent(uint256 index) external view returns (bool);

        function executeTransaction(
            bytes32[] calldata proof,
            uint256 index,
            address l2Sender,
            address to,
            uint256 l2Block,
            uint256 l1Block,
            uint256 l2Timestamp,
            uint256 value,
            bytes calldata data
        ) external;
    }

    struct GlobalState {
        bytes32[2] bytes32Vals;
        uint64[2] u64Vals;
    }

    struct ExecutionState {
        GlobalState globalState;
        uint8 machineStatus;
    }

    struct Assertion {
        ExecutionState beforeState;
        ExecutionState afterState;
        uint64 numBlocks;
    }

    struct Node {
        bytes32 stateHash;
        bytes32 challengeHash;
        bytes32 confirmData;
        uint64 prevNum;
        uint64 deadlineBlock;
        uint64 noChildConfirmedBeforeBlock;
        uint64 stakerCount;
        uint64 childStakerCount;
        uint64 firstChildBlock;
        uint64 latestChildNumber;
        uint64 createdAtBlock;
        bytes32 nodeHash;
    }

    interface Rollup {
        function latestConfirmed() external view returns (uint64);

        function getNode(uint64 nodeNum) external view returns (Node memory);

        event NodeCreated(
            uint64 indexed nodeNum,
            bytes32 indexed parentNodeHash,
            bytes32 indexed nodeHash,
            bytes32 executionHash,
            Assertion assertion,
            bytes32 afterInboxBatchAcc,
            bytes32 wasmModuleRoot,
            uint256 inboxMaxCount
        );
    }

    // ========================================================================
    // NFT bridge application contracts
    // ========================================================================

    /// Parent-side gateway: escrows the token and creates a retryable that mints on the child
    interface ParentNftGateway {
        function depositNft(
            uint256 tokenId,
            address to,
            bytes calldata childCallData,
            uint256 maxSubmissionCost,
            uint256 maxGas,
            uint256 gasPriceBid
        ) external payable;

        /// Called by the outbox when a withdrawal is claimed
        function finalizeWithdrawal(address to, uint256 tokenId) external;
    }

    /// Child-side bridge: mints deposits, burns and messages withdrawals
    interface ChildNftBridge {
        function mint(address to, uint256 tokenId, string calldata tokenUri) external;

        function withdraw(uint256 tokenId, address parentRecipient) external;

        function tokenURI(uint256 tokenId) external view returns (string memory);

        function ownerOf(uint256 tokenId) external view returns (address);

        event WithdrawalCreated(
            address indexed owner,
            uint256 indexed tokenId,
            address parentRecipient,
            string tokenUri
        );

        event TransferCreated(address indexed owner, uint256 indexed tokenId, string tokenUri);
    }
}
